//! Pool of fixed-capacity packet buffers
//!
//! Every packet moving through the router lives in a [`PacketBuf`]: 64 KiB of
//! storage plus the number of bytes currently in use. Buffers are borrowed
//! from a [`BufferPool`] and hand their storage back when dropped, so a buffer
//! returns to the pool exactly once no matter which path (written, dropped on
//! a full queue, filtered out) the packet took.
//!
//! The free list is shared between threads. A buffer acquired on one task can
//! be released from any other.
//!
//! # Usage
//!
//! ```rust
//! use sock_packet::BufferPool;
//!
//! let pool = BufferPool::new();
//!
//! let mut buf = pool.acquire();
//! buf.storage_mut()[..5].copy_from_slice(b"hello");
//! buf.set_len(5);
//! assert_eq!(&buf[..], b"hello");
//!
//! // Dropping the buffer hands its storage back to the pool
//! drop(buf);
//! assert_eq!(pool.len(), 1);
//!
//! // The next acquire reuses it, with the length reset
//! let buf = pool.acquire();
//! assert!(buf.is_empty());
//! assert_eq!(pool.len(), 0);
//! ```

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// Capacity of every packet buffer, large enough for any IPv4 datagram
pub const PACKET_CAPACITY: usize = 1 << 16;

/// Bytes shown by the `Debug` impl before the dump is truncated
const DEBUG_PREVIEW: usize = 32;

type Storage = Box<[u8]>;

static GLOBAL_POOL: OnceLock<BufferPool> = OnceLock::new();

fn alloc_storage() -> Storage {
    vec![0u8; PACKET_CAPACITY].into_boxed_slice()
}

/// Shared free list of packet buffers
///
/// Cloning a pool is cheap and yields a handle to the same free list.
#[derive(Clone, Default)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<Storage>>>,
}

impl BufferPool {
    /// Create an empty pool; storage is allocated on demand
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide pool used when no explicit pool is wired in
    pub fn global() -> &'static BufferPool {
        GLOBAL_POOL.get_or_init(BufferPool::new)
    }

    /// Take a buffer from the pool, allocating if the free list is empty.
    ///
    /// The returned buffer always has a length of zero.
    pub fn acquire(&self) -> PacketBuf {
        let data = self.free.lock().pop().unwrap_or_else(alloc_storage);
        PacketBuf {
            data,
            len: 0,
            pool: self.clone(),
        }
    }

    /// Return a buffer's storage to this pool.
    ///
    /// Equivalent to dropping the buffer when it came from this pool.
    pub fn release(&self, mut buf: PacketBuf) {
        let data = mem::take(&mut buf.data);
        self.put(data);
    }

    /// Pre-allocate buffers so the first packets don't pay for allocation
    pub fn prewarm(&self, count: usize) {
        let mut free = self.free.lock();
        free.reserve(count);
        for _ in 0..count {
            free.push(alloc_storage());
        }
    }

    /// Drop every idle buffer held by the pool
    pub fn clear(&self) {
        self.free.lock().clear();
    }

    /// Number of idle buffers waiting in the pool
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.lock().is_empty()
    }

    fn put(&self, data: Storage) {
        // Storage already handed back leaves an empty slice behind
        if data.len() == PACKET_CAPACITY {
            self.free.lock().push(data);
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.len())
            .finish()
    }
}

/// A packet buffer on loan from a [`BufferPool`]
///
/// Dereferences to the filled part (`..len`). Use [`storage_mut`] to fill
/// the buffer and [`set_len`] to record how much of it is valid.
///
/// [`storage_mut`]: PacketBuf::storage_mut
/// [`set_len`]: PacketBuf::set_len
pub struct PacketBuf {
    data: Storage,
    len: usize,
    pool: BufferPool,
}

impl PacketBuf {
    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total capacity of the underlying storage
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Set the number of valid bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the buffer capacity.
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= self.data.len(),
            "packet length {len} exceeds buffer capacity {}",
            self.data.len()
        );
        self.len = len;
    }

    /// The whole storage, regardless of the current length
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `bytes` into the buffer, replacing its contents
    pub fn fill_from(&mut self, bytes: &[u8]) {
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }
}

impl Deref for PacketBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl DerefMut for PacketBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl AsRef<[u8]> for PacketBuf {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        let data = mem::take(&mut self.data);
        self.pool.put(data);
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.len.min(DEBUG_PREVIEW);
        let mut hex = String::with_capacity(shown * 3);
        for (i, byte) in self[..shown].iter().enumerate() {
            if i > 0 {
                hex.push(' ');
            }
            hex.push_str(&format!("{byte:02x}"));
        }
        if self.len > shown {
            hex.push_str(" ..");
        }
        write!(f, "PacketBuf(len={}, [{}])", self.len, hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_starts_empty() {
        let pool = BufferPool::new();
        let buf = pool.acquire();

        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), PACKET_CAPACITY);
        assert_eq!(&buf[..], &[] as &[u8]);
    }

    #[test]
    fn test_drop_returns_to_pool() {
        let pool = BufferPool::new();
        assert!(pool.is_empty());

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.len(), 0);

        drop(a);
        assert_eq!(pool.len(), 1);
        drop(b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_release_returns_exactly_once() {
        let pool = BufferPool::new();
        let buf = pool.acquire();

        pool.release(buf);
        // The emptied buffer's own Drop must not push a second entry
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_reuse_resets_length() {
        let pool = BufferPool::new();

        let mut buf = pool.acquire();
        buf.fill_from(&[0xAB; 100]);
        assert_eq!(buf.len(), 100);
        drop(buf);

        let buf = pool.acquire();
        assert_eq!(buf.len(), 0);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_set_len_and_storage() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();

        buf.storage_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buf.set_len(3);
        assert_eq!(&buf[..], &[1, 2, 3]);

        buf[0] = 9;
        assert_eq!(&buf[..], &[9, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "exceeds buffer capacity")]
    fn test_set_len_past_capacity_panics() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();
        buf.set_len(PACKET_CAPACITY + 1);
    }

    #[test]
    fn test_prewarm_and_clear() {
        let pool = BufferPool::new();
        pool.prewarm(8);
        assert_eq!(pool.len(), 8);

        let _buf = pool.acquire();
        assert_eq!(pool.len(), 7);

        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_clones_share_free_list() {
        let pool = BufferPool::new();
        let other = pool.clone();

        drop(pool.acquire());
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_debug_truncates() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();
        buf.fill_from(&[0x45, 0x00, 0x00, 0x14]);
        assert_eq!(format!("{buf:?}"), "PacketBuf(len=4, [45 00 00 14])");

        buf.fill_from(&[0u8; 40]);
        assert!(format!("{buf:?}").ends_with(" ..])"));
    }

    #[test]
    fn test_cross_thread_release() {
        use std::sync::mpsc;
        use std::thread;

        let pool = BufferPool::new();
        let (tx, rx) = mpsc::channel();

        let producer_pool = pool.clone();
        let producer = thread::spawn(move || {
            let mut buf = producer_pool.acquire();
            buf.fill_from(b"hello from thread 1");
            tx.send(buf).unwrap();
        });

        let consumer = thread::spawn(move || {
            let buf = rx.recv().unwrap();
            assert_eq!(&buf[..], b"hello from thread 1");
        });

        producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_high_contention() {
        use std::sync::Barrier;
        use std::thread;

        let num_threads = 8;
        let iterations = 200;
        let pool = BufferPool::new();
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut handles = vec![];

        for thread_id in 0..num_threads {
            let barrier = Arc::clone(&barrier);
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();

                let mut success_count = 0;
                for i in 0..iterations {
                    let mut buf = pool.acquire();
                    buf.storage_mut()[..64].fill(thread_id as u8);
                    buf.storage_mut()[64..128].fill((i % 256) as u8);
                    buf.set_len(128);

                    if buf[..64].iter().all(|&b| b == thread_id as u8)
                        && buf[64..].iter().all(|&b| b == (i % 256) as u8)
                    {
                        success_count += 1;
                    }
                }
                success_count
            }));
        }

        for handle in handles {
            assert_eq!(handle.join().unwrap(), iterations);
        }
        // Never more idle buffers than were ever outstanding at once
        assert!(pool.len() <= num_threads);
        assert!(!pool.is_empty());
    }
}
