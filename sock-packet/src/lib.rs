//! Packet plumbing for socktun
//!
//! Everything that touches raw packet bytes lives here and is shared by the
//! tunnel crate and the routing engine:
//!
//! - [`BufferPool`] / [`PacketBuf`]: pooled 64 KiB packet buffers with single
//!   ownership. Dropping a buffer returns it to its pool.
//! - [`ipv4`]: header accessors (version, total length, source, destination).
//! - [`read_packet`]: reads back-to-back IPv4 datagrams from a byte stream,
//!   using the header's total-length field as the only framing.
//! - [`transport`]: the [`TunTransport`] and [`PacketSink`] traits plus
//!   mocks for tests.
//!
//! # Example
//!
//! ```rust
//! use sock_packet::{ipv4, read_packet, BufferPool};
//!
//! # async fn example() -> sock_packet::Result<()> {
//! let pool = BufferPool::new();
//! let wire: &[u8] = &[
//!     0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00,
//!     10, 0, 0, 5, 10, 0, 1, 9,
//! ];
//!
//! let mut reader = wire;
//! let mut buf = pool.acquire();
//! assert!(read_packet(&mut reader, &mut buf).await?);
//! assert_eq!(buf.len(), 20);
//! assert_eq!(ipv4::destination(&buf), Some([10, 0, 1, 9].into()));
//! # Ok(())
//! # }
//! ```

mod buffer_pool;
mod error;
pub mod ipv4;
mod stream;
pub mod transport;

pub use buffer_pool::{BufferPool, PacketBuf, PACKET_CAPACITY};
pub use error::{Error, Result};
pub use stream::read_packet;
pub use transport::{PacketSink, TunTransport};
