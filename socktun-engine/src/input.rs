//! Inbound side: peer sockets to the TUN device
//!
//! Peers connect to one listening Unix socket and stream raw IPv4 packets.
//! Each packet whose source address lies inside the configured filter is
//! queued, unmodified, on the TUN device's writer; everything else is
//! discarded. A malformed packet ends the connection it arrived on.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ipnet::Ipv4Net;
use sock_packet::{ipv4, read_packet, BufferPool, TunTransport, PACKET_CAPACITY};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use crate::writer::WriterWorker;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Settings for the input listener
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// Allowed source range
    pub filter: Ipv4Net,
    /// Socket path to listen on
    pub sock: PathBuf,
    /// Queue size of the TUN writer
    pub queue_capacity: Option<usize>,
}

/// Accept peer connections and forward their packets to `tun` until
/// shutdown.
///
/// Returns once the listener is closed, its socket file removed and every
/// connection handler has finished. Only a failure to bind is an error.
pub async fn run_input<T>(
    tun: Arc<T>,
    options: InputOptions,
    pool: BufferPool,
    shutdown: Shutdown,
) -> Result<()>
where
    T: TunTransport + ?Sized + 'static,
{
    let InputOptions {
        filter,
        sock,
        queue_capacity,
    } = options;

    let listener = bind(&sock)?;
    log::info!(
        "Listening on {} for sources in {}",
        sock.display(),
        filter
    );

    let tun_writer = Arc::new(WriterWorker::spawn(tun, &shutdown, queue_capacity, None));
    let mut handlers = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    log::warn!("Input connection handler failed: {}", e);
                }
                continue;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
                handlers.spawn(handle_connection(
                    id,
                    stream,
                    filter,
                    Arc::clone(&tun_writer),
                    pool.clone(),
                    shutdown.child(),
                ));
            }
            Err(e) => {
                log::warn!("Accept on {} failed: {}", sock.display(), e);
                if !shutdown.random_backoff().await {
                    break;
                }
            }
        }
    }

    drop(listener);
    if let Err(e) = std::fs::remove_file(&sock) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", sock.display(), e);
        }
    }

    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            log::warn!("Input connection handler failed: {}", e);
        }
    }
    tun_writer.close();

    log::info!("Input listener on {} stopped", sock.display());
    Ok(())
}

/// Bind `path`, replacing a socket file left behind by an earlier run
fn bind(path: &Path) -> Result<UnixListener> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            log::debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path).map_err(|source| Error::Listen {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(_) => {
            return Err(Error::Listen {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "path exists and is not a socket"),
            });
        }
        Err(_) => {}
    }

    UnixListener::bind(path).map_err(|source| Error::Listen {
        path: path.to_path_buf(),
        source,
    })
}

async fn handle_connection(
    id: u64,
    stream: UnixStream,
    filter: Ipv4Net,
    tun_writer: Arc<WriterWorker>,
    pool: BufferPool,
    scope: Shutdown,
) {
    let _guard = scope.drop_guard();
    log::debug!("Input connection #{} opened", id);

    let mut reader = BufReader::with_capacity(PACKET_CAPACITY, stream);
    let mut forwarded = 0u64;

    loop {
        let mut buf = pool.acquire();

        let read = tokio::select! {
            biased;
            _ = scope.wait() => break,
            read = read_packet(&mut reader, &mut buf) => read,
        };

        match read {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log::warn!("Input connection #{}: {}", id, e);
                break;
            }
        }

        let Some(src) = ipv4::source(&buf) else {
            break;
        };
        if !filter.contains(&src) {
            log::trace!("Input connection #{}: source {} not in {}", id, src, filter);
            continue;
        }

        if tun_writer.enqueue(buf) {
            forwarded += 1;
        }
    }

    log::debug!(
        "Input connection #{} closed after {} packet(s)",
        id,
        forwarded
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sock_packet::transport::mock::{Ipv4PacketBuilder, MockTun};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Harness {
        _dir: TempDir,
        sock: PathBuf,
        tun: Arc<MockTun>,
        shutdown: Shutdown,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(filter: &str) -> Harness {
        start_with_queue(filter, None)
    }

    fn start_with_queue(filter: &str, queue_capacity: Option<usize>) -> Harness {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("input.sock");
        let tun = Arc::new(MockTun::new("tun-test"));
        let shutdown = Shutdown::new();

        let options = InputOptions {
            filter: filter.parse().unwrap(),
            sock: sock.clone(),
            queue_capacity,
        };
        let task = tokio::spawn(run_input(
            Arc::clone(&tun),
            options,
            BufferPool::new(),
            shutdown.clone(),
        ));

        Harness {
            _dir: dir,
            sock,
            tun,
            shutdown,
            task,
        }
    }

    async fn connect(path: &Path) -> UnixStream {
        for _ in 0..200 {
            if let Ok(stream) = UnixStream::connect(path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("listener at {} never came up", path.display());
    }

    /// Test that a packet from an allowed source reaches the TUN unmodified
    #[tokio::test]
    async fn test_allowed_source_forwarded() {
        let h = start("10.0.0.0/24");
        let mut peer = connect(&h.sock).await;

        let packet = Ipv4PacketBuilder::new()
            .src([10, 0, 0, 5])
            .dst([10, 0, 9, 9])
            .payload(&[0xAA; 8])
            .build();
        assert_eq!(packet.len(), 28);
        peer.write_all(&packet).await.unwrap();

        assert!(h.tun.wait_for_sent(1, Duration::from_secs(1)).await);
        assert_eq!(h.tun.sent_packets(), vec![packet]);

        h.shutdown.trigger();
        h.task.await.unwrap().unwrap();
    }

    /// Test that header fields are passed through untouched, TTL included
    #[tokio::test]
    async fn test_header_not_rewritten() {
        let h = start("10.0.0.0/24");
        let mut peer = connect(&h.sock).await;

        let packet = Ipv4PacketBuilder::new()
            .src([10, 0, 0, 9])
            .dst([10, 0, 7, 7])
            .protocol(6)
            .ttl(1)
            .payload(&[0x55; 20])
            .build();
        peer.write_all(&packet).await.unwrap();

        assert!(h.tun.wait_for_sent(1, Duration::from_secs(1)).await);
        let sent = h.tun.sent_packets();
        assert_eq!(sent[0][8], 1, "TTL must not be decremented");
        assert_eq!(sent[0][9], 6);
        assert_eq!(sent, vec![packet]);

        h.shutdown.trigger();
        h.task.await.unwrap().unwrap();
    }

    /// Test that a packet from outside the filter never reaches the TUN
    #[tokio::test]
    async fn test_foreign_source_discarded() {
        let h = start("10.0.0.0/24");
        let mut peer = connect(&h.sock).await;

        let foreign = Ipv4PacketBuilder::new()
            .src([192, 168, 1, 1])
            .dst([10, 0, 0, 1])
            .payload(&[0; 8])
            .build();
        let allowed = Ipv4PacketBuilder::new()
            .src([10, 0, 0, 7])
            .dst([10, 0, 0, 1])
            .payload(&[1; 8])
            .build();

        peer.write_all(&foreign).await.unwrap();
        peer.write_all(&allowed).await.unwrap();

        // The allowed packet arrives, proving the foreign one was read first
        assert!(h.tun.wait_for_sent(1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.tun.sent_packets(), vec![allowed]);

        h.shutdown.trigger();
        h.task.await.unwrap().unwrap();
    }

    /// Test that packets on one connection are forwarded in order
    #[tokio::test]
    async fn test_order_preserved() {
        // Room for the whole burst; a full queue would drop, not reorder
        let h = start_with_queue("10.0.0.0/24", Some(16));
        let mut peer = connect(&h.sock).await;

        let packets: Vec<Vec<u8>> = (0..10u8)
            .map(|i| {
                Ipv4PacketBuilder::new()
                    .src([10, 0, 0, 1])
                    .payload(&[i; 16])
                    .build()
            })
            .collect();
        let wire: Vec<u8> = packets.concat();
        peer.write_all(&wire).await.unwrap();

        assert!(h.tun.wait_for_sent(10, Duration::from_secs(1)).await);
        assert_eq!(h.tun.sent_packets(), packets);

        h.shutdown.trigger();
        h.task.await.unwrap().unwrap();
    }

    /// Test that a malformed packet ends only its own connection
    #[tokio::test]
    async fn test_malformed_packet_closes_connection() {
        let h = start("10.0.0.0/24");
        let mut bad = connect(&h.sock).await;
        let mut good = connect(&h.sock).await;

        let ipv6ish = Ipv4PacketBuilder::new().version(6).payload(&[0; 20]).build();
        bad.write_all(&ipv6ish).await.unwrap();

        let mut byte = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), bad.read(&mut byte))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "server should close the connection");

        let packet = Ipv4PacketBuilder::new().src([10, 0, 0, 2]).build();
        good.write_all(&packet).await.unwrap();
        assert!(h.tun.wait_for_sent(1, Duration::from_secs(1)).await);
        assert_eq!(h.tun.sent_packets(), vec![packet]);

        h.shutdown.trigger();
        h.task.await.unwrap().unwrap();
    }

    /// Test that shutdown unblocks handlers and removes the socket file
    #[tokio::test]
    async fn test_shutdown_cleans_up() {
        let h = start("10.0.0.0/24");
        let mut peer = connect(&h.sock).await;
        assert!(h.sock.exists());

        // A forwarded packet proves the connection has a running handler
        let packet = Ipv4PacketBuilder::new().src([10, 0, 0, 3]).build();
        peer.write_all(&packet).await.unwrap();
        assert!(h.tun.wait_for_sent(1, Duration::from_secs(1)).await);

        h.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(!h.sock.exists());
        let mut byte = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), peer.read(&mut byte))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    /// Test that a connection still queued in the backlog at shutdown does
    /// not hold the listener open
    #[tokio::test]
    async fn test_shutdown_with_pending_connection() {
        let h = start("10.0.0.0/24");
        let mut pending = connect(&h.sock).await;

        h.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!h.sock.exists());

        // Either accepted and closed, or reset with the listener
        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(1), pending.read(&mut byte))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    /// Test that a socket file left by an earlier run is replaced
    #[tokio::test]
    async fn test_stale_socket_replaced() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("input.sock");
        drop(std::os::unix::net::UnixListener::bind(&sock).unwrap());
        assert!(sock.exists());

        let listener = bind(&sock).unwrap();
        drop(listener);
    }

    /// Test that a regular file at the socket path is left alone
    #[tokio::test]
    async fn test_refuses_to_replace_regular_file() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("input.sock");
        std::fs::write(&sock, b"keep me").unwrap();

        let err = bind(&sock).unwrap_err();
        assert!(matches!(err, Error::Listen { .. }));
        assert_eq!(std::fs::read(&sock).unwrap(), b"keep me");
    }
}
