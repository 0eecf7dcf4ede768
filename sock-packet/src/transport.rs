//! Transport traits for the tunnel device and packet sinks
//!
//! Two seams keep the router independent of real devices and sockets:
//! - [`TunTransport`]: the TUN interface, read and written concurrently
//!   through a shared reference
//! - [`PacketSink`]: anything a writer worker drains whole packets into
//!   (a Unix stream, the TUN device, a test mock)
//!
//! # Mock Implementations
//!
//! The [`mock`] module provides test doubles:
//! - [`mock::MockTun`]: in-memory TUN with packet injection and capture
//! - [`mock::MockSink`]: recording sink that can stall or fail on demand
//! - [`mock::Ipv4PacketBuilder`]: helper for building test datagrams
//!
//! # Example
//!
//! ```ignore
//! use sock_packet::{BufferPool, TunTransport};
//!
//! async fn pump<T: TunTransport>(tun: &T, pool: &BufferPool) -> sock_packet::Result<()> {
//!     let mut buf = pool.acquire();
//!     let n = tun.recv(buf.storage_mut()).await?;
//!     buf.set_len(n);
//!     tun.send(&buf).await?;
//!     Ok(())
//! }
//! ```

pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::error::{Error, Result};

/// Information about a TUN interface
#[derive(Debug, Clone)]
pub struct TunInfo {
    /// Interface name (e.g., "tun0")
    pub name: String,
    /// Maximum transmission unit size
    pub mtu: u16,
}

/// Async transport trait for TUN interface operations
///
/// The TUN interface operates at layer 3: every `recv` yields one raw IP
/// datagram and every `send` writes one. `recv` and `send` may be called
/// from different tasks at the same time.
#[async_trait]
pub trait TunTransport: Send + Sync {
    /// Receive one IP packet from the interface.
    ///
    /// # Cancel Safety
    ///
    /// This method should be cancel-safe. If cancelled, no data is lost.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send one IP packet to the interface, returning the bytes written
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Get information about the TUN interface
    fn info(&self) -> &TunInfo;

    /// Get the interface name
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Get the MTU of the interface
    fn mtu(&self) -> u16 {
        self.info().mtu
    }
}

/// Destination a writer worker drains packets into
///
/// Each call writes one whole packet. Writing fewer bytes than given is an
/// error ([`Error::ShortWrite`] or an I/O error), never a silent success.
#[async_trait]
pub trait PacketSink: Send + 'static {
    async fn write_packet(&mut self, packet: &[u8]) -> Result<()>;
}

#[async_trait]
impl<T> PacketSink for Arc<T>
where
    T: TunTransport + ?Sized + 'static,
{
    async fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        let written = self.send(packet).await?;
        if written != packet.len() {
            return Err(Error::ShortWrite {
                expected: packet.len(),
                actual: written,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PacketSink for UnixStream {
    async fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        // write_all reports a zero-length write as WriteZero
        self.write_all(packet).await?;
        Ok(())
    }
}
