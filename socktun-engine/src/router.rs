//! Destination routing with a lookup cache
//!
//! Routes are matched first-match-wins in configuration order. Results,
//! including "no route", are cached per destination address for a fixed
//! TTL. The cache never changes an answer: an entry is either fresh, or
//! expired and then refreshed, evicted or swept.
//!
//! An expired entry hit by a lookup is evicted while the cache holds more
//! than its ceiling and refreshed in place otherwise. Entries that are never
//! looked up again are dropped by a sweep on the insert path: once the map
//! reaches its sweep threshold every expired entry goes, and the threshold
//! moves to twice what survived (never below the ceiling). The map is thus
//! bounded by twice the number of distinct addresses seen within one TTL,
//! or the ceiling, whichever is larger.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use parking_lot::RwLock;

/// Lifetime of a cached lookup
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Entry count above which expired entries are evicted instead of refreshed
pub const DEFAULT_CACHE_CEILING: usize = 2048;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    route: Option<usize>,
    expires_at: Instant,
}

#[derive(Debug)]
struct Cache {
    entries: HashMap<u32, CacheEntry>,
    /// Size at which the next insert sweeps out expired entries
    sweep_at: usize,
}

impl Cache {
    fn insert(&mut self, key: u32, entry: CacheEntry, now: Instant, ceiling: usize) {
        if self.entries.len() >= self.sweep_at && !self.entries.contains_key(&key) {
            self.entries.retain(|_, e| e.expires_at > now);
            self.sweep_at = ceiling.max(self.entries.len() * 2);
            log::trace!("Route cache swept, {} entries left", self.entries.len());
        }
        self.entries.insert(key, entry);
    }
}

/// Ordered CIDR table with a TTL cache in front
#[derive(Debug)]
pub struct Router<T> {
    routes: Vec<(Ipv4Net, Arc<T>)>,
    cache: RwLock<Cache>,
    ttl: Duration,
    ceiling: usize,
}

impl<T> Router<T> {
    pub fn new(routes: Vec<(Ipv4Net, T)>) -> Self {
        Self::with_cache(routes, DEFAULT_CACHE_TTL, DEFAULT_CACHE_CEILING)
    }

    pub fn with_cache(routes: Vec<(Ipv4Net, T)>, ttl: Duration, ceiling: usize) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(net, target)| (net.trunc(), Arc::new(target)))
                .collect(),
            cache: RwLock::new(Cache {
                entries: HashMap::new(),
                sweep_at: ceiling,
            }),
            ttl,
            ceiling,
        }
    }

    /// Route for `addr`, or `None` when no filter contains it
    pub fn resolve(&self, addr: Ipv4Addr) -> Option<&Arc<T>> {
        let key = u32::from(addr);
        let now = Instant::now();

        let index = match self.cached(key, now) {
            Some(hit) => hit,
            None => {
                let index = self.scan(addr);
                // A racing lookup may insert the same answer first; either wins
                self.cache.write().insert(
                    key,
                    CacheEntry {
                        route: index,
                        expires_at: now + self.ttl,
                    },
                    now,
                    self.ceiling,
                );
                index
            }
        };

        index.map(|i| &self.routes[i].1)
    }

    /// Cached answer for `key`, refreshing or evicting it if expired
    fn cached(&self, key: u32, now: Instant) -> Option<Option<usize>> {
        {
            let cache = self.cache.read();
            match cache.entries.get(&key) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.route),
                Some(_) => {}
            }
        }

        let mut cache = self.cache.write();
        let over_ceiling = cache.entries.len() > self.ceiling;
        let entry = cache.entries.get_mut(&key)?;
        let route = entry.route;
        if over_ceiling {
            cache.entries.remove(&key);
        } else {
            entry.expires_at = now + self.ttl;
        }
        Some(route)
    }

    fn scan(&self, addr: Ipv4Addr) -> Option<usize> {
        self.routes.iter().position(|(net, _)| net.contains(&addr))
    }

    /// Configured routes in match order
    pub fn routes(&self) -> impl Iterator<Item = (&Ipv4Net, &Arc<T>)> {
        self.routes.iter().map(|(net, target)| (net, target))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Number of cached lookups, fresh or expired
    pub fn cache_len(&self) -> usize {
        self.cache.read().entries.len()
    }
}
