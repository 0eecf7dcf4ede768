//! Mock transport implementations for testing
//!
//! In-memory stand-ins for the TUN device and for packet sinks, so the
//! routing engine can be exercised without privileges or real sockets.
//!
//! # Example
//!
//! ```rust
//! use sock_packet::transport::mock::{Ipv4PacketBuilder, MockTun};
//! use sock_packet::TunTransport;
//!
//! # async fn example() {
//! let tun = MockTun::new("tun-test");
//!
//! // Simulate the OS handing a packet to the interface
//! let packet = Ipv4PacketBuilder::new()
//!     .src([10, 0, 0, 5])
//!     .dst([10, 0, 1, 9])
//!     .payload(b"hello")
//!     .build();
//! tun.inject(packet.clone());
//!
//! let mut buf = vec![0u8; 2048];
//! let n = tun.recv(&mut buf).await.unwrap();
//! assert_eq!(&buf[..n], &packet[..]);
//! # }
//! ```

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, Semaphore};

use super::{PacketSink, TunInfo, TunTransport};
use crate::error::{Error, Result};

/// Shared record of written packets with a wake-up for waiters
#[derive(Default)]
struct Capture {
    packets: Mutex<Vec<Vec<u8>>>,
    notify: Notify,
}

impl Capture {
    fn push(&self, packet: &[u8]) {
        self.packets.lock().push(packet.to_vec());
        self.notify.notify_waiters();
    }

    fn snapshot(&self) -> Vec<Vec<u8>> {
        self.packets.lock().clone()
    }

    fn count(&self) -> usize {
        self.packets.lock().len()
    }

    async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so a push in between is not missed
            let notified = self.notify.notified();
            if self.count() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() >= count;
            }
        }
    }
}

/// Mock TUN device
///
/// Packets passed to [`inject`](MockTun::inject) come out of `recv` in
/// order; `recv` waits while nothing is queued, like a real interface.
/// Every `send` is captured.
pub struct MockTun {
    info: TunInfo,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    capture: Capture,
    recv_failures: AtomicUsize,
    send_limit: AtomicUsize,
}

impl MockTun {
    pub fn new(name: &str) -> Self {
        Self::with_mtu(name, 1500)
    }

    pub fn with_mtu(name: &str, mtu: u16) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            info: TunInfo {
                name: name.to_string(),
                mtu,
            },
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            capture: Capture::default(),
            recv_failures: AtomicUsize::new(0),
            send_limit: AtomicUsize::new(usize::MAX),
        }
    }

    /// Queue a packet to be returned by `recv`
    pub fn inject(&self, packet: Vec<u8>) {
        // The receiver lives as long as self, so this cannot fail
        let _ = self.inbound_tx.send(packet);
    }

    /// Make the next `count` calls to `recv` fail with an I/O error
    pub fn fail_next_recv(&self, count: usize) {
        self.recv_failures.store(count, Ordering::SeqCst);
    }

    /// Cap the number of bytes each `send` reports as written
    pub fn truncate_sends(&self, limit: usize) {
        self.send_limit.store(limit, Ordering::SeqCst);
    }

    /// Packets written to the device so far
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        self.capture.snapshot()
    }

    pub fn sent_count(&self) -> usize {
        self.capture.count()
    }

    /// Wait until at least `count` packets were sent; false on timeout
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        self.capture.wait_for(count, timeout).await
    }
}

#[async_trait]
impl TunTransport for MockTun {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let pending = self.recv_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.recv_failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Io(io::Error::other("injected recv failure")));
        }

        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            None => Err(Error::Io(io::ErrorKind::BrokenPipe.into())),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let limit = self.send_limit.load(Ordering::SeqCst);
        let written = buf.len().min(limit);
        self.capture.push(&buf[..written]);
        Ok(written)
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

struct SinkState {
    capture: Capture,
    gate: Option<Semaphore>,
    failures: AtomicUsize,
}

/// Recording packet sink
///
/// Clones share the same record. A stalled sink blocks every write until
/// [`release`](MockSink::release) hands out permits, which lets tests fill
/// a writer's queue deterministically.
#[derive(Clone)]
pub struct MockSink {
    state: Arc<SinkState>,
}

impl MockSink {
    /// Sink that accepts every write immediately
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Sink whose writes block until released
    pub fn stalled() -> Self {
        Self::build(Some(Semaphore::new(0)))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            state: Arc::new(SinkState {
                capture: Capture::default(),
                gate,
                failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Let `count` more writes through a stalled sink
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.state.gate {
            gate.add_permits(count);
        }
    }

    /// Make the next `count` writes fail with a broken pipe
    pub fn fail_next(&self, count: usize) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.capture.snapshot()
    }

    pub fn written_count(&self) -> usize {
        self.state.capture.count()
    }

    /// Wait until at least `count` packets were written; false on timeout
    pub async fn wait_for_written(&self, count: usize, timeout: Duration) -> bool {
        self.state.capture.wait_for(count, timeout).await
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketSink for MockSink {
    async fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        if let Some(gate) = &self.state.gate {
            gate.acquire()
                .await
                .map_err(|_| Error::Io(io::ErrorKind::BrokenPipe.into()))?
                .forget();
        }

        let pending = self.state.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Io(io::ErrorKind::BrokenPipe.into()));
        }

        self.state.capture.push(packet);
        Ok(())
    }
}

/// Builder for IPv4 test datagrams
///
/// Produces a 20-byte header (no options, DF set, TTL 64) followed by the
/// payload. The checksum is left at zero; nothing in the router reads it.
#[derive(Debug, Clone)]
pub struct Ipv4PacketBuilder {
    version: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    payload: Vec<u8>,
    total_length: Option<u16>,
}

impl Ipv4PacketBuilder {
    pub fn new() -> Self {
        Self {
            version: 4,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            protocol: 17,
            ttl: 64,
            payload: Vec::new(),
            total_length: None,
        }
    }

    pub fn src(mut self, addr: impl Into<Ipv4Addr>) -> Self {
        self.src = addr.into();
        self
    }

    pub fn dst(mut self, addr: impl Into<Ipv4Addr>) -> Self {
        self.dst = addr.into();
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Wrap `data` in a UDP header (no checksum)
    pub fn with_udp(mut self, src_port: u16, dst_port: u16, data: &[u8]) -> Self {
        let udp_len = (8 + data.len()) as u16;
        let mut udp = Vec::with_capacity(udp_len as usize);
        udp.extend_from_slice(&src_port.to_be_bytes());
        udp.extend_from_slice(&dst_port.to_be_bytes());
        udp.extend_from_slice(&udp_len.to_be_bytes());
        udp.extend_from_slice(&[0, 0]);
        udp.extend_from_slice(data);

        self.protocol = 17;
        self.payload = udp;
        self
    }

    /// Override the version nibble, for malformed-input tests
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Override the total-length field, for malformed-input tests
    pub fn total_length(mut self, length: u16) -> Self {
        self.total_length = Some(length);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let actual = 20 + self.payload.len();
        let total = self.total_length.unwrap_or(actual as u16);

        let mut packet = Vec::with_capacity(actual);
        packet.push((self.version << 4) | 5);
        packet.push(0);
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&[0, 0]); // identification
        packet.extend_from_slice(&[0x40, 0]); // DF, no offset
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0, 0]); // checksum
        packet.extend_from_slice(&self.src.octets());
        packet.extend_from_slice(&self.dst.octets());
        packet.extend_from_slice(&self.payload);
        packet
    }
}

impl Default for Ipv4PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipv4;

    #[test]
    fn test_builder_layout() {
        let packet = Ipv4PacketBuilder::new()
            .src([192, 168, 1, 1])
            .dst([8, 8, 8, 8])
            .with_udp(12345, 53, b"query")
            .build();

        assert_eq!(packet.len(), 20 + 8 + 5);
        assert_eq!(packet[0], 0x45);
        assert_eq!(ipv4::total_length(&packet), Some(33));
        assert_eq!(packet[9], 17);
        assert_eq!(ipv4::source(&packet), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(ipv4::destination(&packet), Some(Ipv4Addr::new(8, 8, 8, 8)));
        assert_eq!(&packet[20..22], &12345u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_mock_tun_inject_and_capture() {
        let tun = MockTun::new("tun-test");
        assert_eq!(tun.name(), "tun-test");
        assert_eq!(tun.mtu(), 1500);

        tun.inject(vec![1, 2, 3]);
        tun.inject(vec![4, 5]);

        let mut buf = [0u8; 16];
        assert_eq!(tun.recv(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(tun.recv(&mut buf).await.unwrap(), 2);

        tun.send(&[9, 9]).await.unwrap();
        assert_eq!(tun.sent_count(), 1);
        assert!(tun.wait_for_sent(1, Duration::from_millis(10)).await);
        assert!(!tun.wait_for_sent(2, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_mock_tun_recv_waits() {
        let tun = MockTun::new("tun-test");
        let mut buf = [0u8; 16];

        let pending = tokio::time::timeout(Duration::from_millis(20), tun.recv(&mut buf)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_mock_tun_injected_failures() {
        let tun = MockTun::new("tun-test");
        tun.fail_next_recv(2);
        tun.inject(vec![7]);

        let mut buf = [0u8; 4];
        assert!(tun.recv(&mut buf).await.is_err());
        assert!(tun.recv(&mut buf).await.is_err());
        assert_eq!(tun.recv(&mut buf).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stalled_sink_releases() {
        let sink = MockSink::stalled();
        let mut writer = sink.clone();

        let task = tokio::spawn(async move {
            writer.write_packet(&[1]).await.unwrap();
            writer.write_packet(&[2]).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.written_count(), 0);

        sink.release(2);
        task.await.unwrap();
        assert_eq!(sink.written(), vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_sink_failures() {
        let mut sink = MockSink::new();
        sink.fail_next(1);

        assert!(sink.write_packet(&[1]).await.is_err());
        assert!(sink.write_packet(&[2]).await.is_ok());
        assert_eq!(sink.written(), vec![vec![2]]);
    }
}
