//! Shutdown signalling
//!
//! [`Shutdown`] is a one-shot broadcast flag. Triggering it is idempotent and
//! may happen from any thread; every task holding a clone (or a child) can
//! poll it or await it inside `tokio::select!`. Pending socket and device
//! I/O is raced against [`Shutdown::wait`], so triggering makes blocked reads
//! and writes return promptly by dropping their futures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Lower bound of the retry backoff, in milliseconds
pub const BACKOFF_MIN_MS: u64 = 101;

/// Upper bound of the retry backoff, in milliseconds
pub const BACKOFF_MAX_MS: u64 = 1000;

/// Cloneable shutdown flag
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shutdown for this scope and every child
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once shutdown has been triggered
    pub fn wait(&self) -> impl Future<Output = ()> + Send + '_ {
        self.token.cancelled()
    }

    /// Child scope: triggered by its own `trigger` or by this scope's.
    /// Triggering the child never affects the parent.
    pub fn child(&self) -> Shutdown {
        Shutdown {
            token: self.token.child_token(),
        }
    }

    /// Trigger this scope when the returned guard is dropped
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Sleep for `duration` unless shutdown fires first.
    ///
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Sleep for a random 101..=1000 ms unless shutdown fires first
    pub async fn random_backoff(&self) -> bool {
        self.sleep(backoff_duration()).await
    }
}

/// Uniformly random retry delay between 101 and 1000 ms
pub fn backoff_duration() -> Duration {
    Duration::from_millis(rand::rng().random_range(BACKOFF_MIN_MS..=BACKOFF_MAX_MS))
}
