//! End-to-end routing tests
//!
//! These drive a full [`RouterEngine`] over a mock TUN device and real Unix
//! sockets in a temporary directory. No privileges are required.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sock_packet::transport::mock::{Ipv4PacketBuilder, MockTun};
use sock_packet::{read_packet, BufferPool};
use socktun_engine::{Config, RouterEngine, Shutdown};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

struct Running {
    dir: TempDir,
    tun: Arc<MockTun>,
    shutdown: Shutdown,
    task: JoinHandle<socktun_engine::Result<()>>,
}

impl Running {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Stop the engine, handing back the directory so callers can inspect it
    async fn stop(self) -> TempDir {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("engine did not stop")
            .unwrap()
            .unwrap();
        self.dir
    }
}

fn write_config(dir: &Path) -> Config {
    let toml = format!(
        r#"
[tun]
name = "socktun-e2e"

[input]
filter = "10.0.0.0/24"
sock = "{dir}/input.sock"

[[output]]
filter = "10.0.1.0/24"
sock = "{dir}/a.sock"

[[output]]
filter = "10.0.2.0/24"
sock = "{dir}/b.sock"
"#,
        dir = dir.display()
    );
    let path = dir.join("socktun.toml");
    std::fs::write(&path, toml).unwrap();
    Config::load(&path).unwrap()
}

fn start(dir: TempDir) -> Running {
    let config = write_config(dir.path());
    let engine = RouterEngine::new(config)
        .unwrap()
        .with_pool(BufferPool::new());
    let shutdown = engine.shutdown_handle();
    let tun = Arc::new(MockTun::new("tun-e2e"));

    let device = Arc::clone(&tun);
    let task = tokio::spawn(async move { engine.run_with_tun(device).await });

    Running {
        dir,
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
    panic!("{} never came up", path.display());
}

/// Test that a TUN packet reaches only the peer owning its destination
#[tokio::test]
async fn test_destination_routed_to_matching_peer() {
    let dir = TempDir::new().unwrap();
    let listener_a = UnixListener::bind(dir.path().join("a.sock")).unwrap();
    let listener_b = UnixListener::bind(dir.path().join("b.sock")).unwrap();
    let running = start(dir);

    let packet = Ipv4PacketBuilder::new()
        .src([10, 0, 0, 1])
        .dst([10, 0, 1, 9])
        .with_udp(5000, 6000, b"to peer a")
        .build();

    // The first packet only opens the link
    running.tun.inject(packet.clone());
    let (mut peer_a, _) = tokio::time::timeout(Duration::from_secs(1), listener_a.accept())
        .await
        .unwrap()
        .unwrap();

    // Resend until the link is published and a copy comes through
    let reader = tokio::spawn(async move {
        let pool = BufferPool::new();
        let mut got = pool.acquire();
        assert!(read_packet(&mut peer_a, &mut got).await.unwrap());
        got.to_vec()
    });
    for _ in 0..100 {
        if reader.is_finished() {
            break;
        }
        running.tun.inject(packet.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let got = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, packet);

    let b = tokio::time::timeout(Duration::from_millis(200), listener_b.accept()).await;
    assert!(b.is_err(), "peer b must not be contacted");

    running.stop().await;
}

/// Test the inbound direction through the full engine
#[tokio::test]
async fn test_inbound_filtered_by_source() {
    let running = start(TempDir::new().unwrap());
    let mut peer = connect(&running.path("input.sock")).await;

    let allowed = Ipv4PacketBuilder::new()
        .src([10, 0, 0, 5])
        .dst([172, 16, 0, 1])
        .payload(&[1; 8])
        .build();
    let foreign = Ipv4PacketBuilder::new()
        .src([192, 168, 1, 1])
        .dst([172, 16, 0, 1])
        .payload(&[2; 8])
        .build();

    peer.write_all(&foreign).await.unwrap();
    peer.write_all(&allowed).await.unwrap();

    assert!(running.tun.wait_for_sent(1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(running.tun.sent_packets(), vec![allowed]);

    running.stop().await;
}

/// Test that shutdown with live connections on both sides completes
#[tokio::test]
async fn test_shutdown_with_open_connections() {
    let dir = TempDir::new().unwrap();
    let listener_a = UnixListener::bind(dir.path().join("a.sock")).unwrap();
    let running = start(dir);

    let _inbound = connect(&running.path("input.sock")).await;
    running.tun.inject(
        Ipv4PacketBuilder::new()
            .dst([10, 0, 1, 1])
            .build(),
    );
    let (_outbound, _) = tokio::time::timeout(Duration::from_secs(1), listener_a.accept())
        .await
        .unwrap()
        .unwrap();

    let input_sock = running.path("input.sock");
    let _dir = running.stop().await;
    assert!(!input_sock.exists());
}
