//! Outbound side: TUN device to peer sockets
//!
//! Every packet read from the device is routed by destination address to an
//! [`OutputWriter`]. A writer connects to its peer socket on demand: the
//! packet that finds the link down is dropped and starts a single dial in
//! the background. A failed dial backs off for a random 101..=1000 ms before
//! the link may be retried; a failed write tears the link down so the next
//! packet reconnects.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use sock_packet::ipv4::{self, HEADER_LEN};
use sock_packet::{BufferPool, PacketBuf, TunTransport};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::config::OutputRoute;
use crate::error::Result;
use crate::router::Router;
use crate::shutdown::Shutdown;
use crate::writer::WriterWorker;

/// Observable state of a route's link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
}

enum LinkState {
    Idle,
    Connecting,
    Connected(Arc<WriterWorker>),
}

impl LinkState {
    fn status(&self) -> LinkStatus {
        match self {
            LinkState::Idle => LinkStatus::Idle,
            LinkState::Connecting => LinkStatus::Connecting,
            LinkState::Connected(_) => LinkStatus::Connected,
        }
    }
}

/// Lazily connected writer for one output route
pub struct OutputWriter {
    filter: Ipv4Net,
    sock: PathBuf,
    state: Mutex<LinkState>,
    shutdown: Shutdown,
    queue_capacity: Option<usize>,
}

impl OutputWriter {
    /// Create an idle writer; nothing is dialed until the first packet
    pub fn new(
        filter: Ipv4Net,
        sock: impl Into<PathBuf>,
        scope: &Shutdown,
        queue_capacity: Option<usize>,
    ) -> Self {
        Self {
            filter,
            sock: sock.into(),
            state: Mutex::new(LinkState::Idle),
            shutdown: scope.child(),
            queue_capacity,
        }
    }

    pub fn filter(&self) -> Ipv4Net {
        self.filter
    }

    pub fn sock(&self) -> &Path {
        &self.sock
    }

    pub fn link_status(&self) -> LinkStatus {
        self.state.lock().status()
    }

    /// Send a packet to the peer.
    ///
    /// Never waits. When the link is not up the packet is dropped, and if
    /// the link was idle a connection attempt is started.
    pub fn write(self: &Arc<Self>, buf: PacketBuf) {
        let worker = {
            let mut state = self.state.lock();
            match &*state {
                LinkState::Connected(worker) => Some(Arc::clone(worker)),
                LinkState::Connecting => None,
                LinkState::Idle => {
                    if self.shutdown.is_triggered() {
                        return;
                    }
                    *state = LinkState::Connecting;
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.connect().await });
                    None
                }
            }
        };

        match worker {
            Some(worker) => {
                worker.enqueue(buf);
            }
            None => log::trace!(
                "Link to {} not up, dropping {} byte packet",
                self.sock.display(),
                buf.len()
            ),
        }
    }

    /// Tear down the link and stop reconnecting
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    async fn connect(self: Arc<Self>) {
        log::debug!("Connecting to {}", self.sock.display());

        let dialed = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                self.set_idle();
                return;
            }
            dialed = UnixStream::connect(&self.sock) => dialed,
        };

        match dialed {
            Ok(stream) => self.attach(stream),
            Err(e) => {
                log::warn!("Failed to connect to {}: {}", self.sock.display(), e);
                self.shutdown.random_backoff().await;
                self.set_idle();
            }
        }
    }

    fn attach(self: &Arc<Self>, stream: UnixStream) {
        let (err_tx, err_rx) = mpsc::channel(1);
        let worker = Arc::new(WriterWorker::spawn(
            stream,
            &self.shutdown,
            self.queue_capacity,
            Some(err_tx),
        ));

        {
            let mut state = self.state.lock();
            if self.shutdown.is_triggered() {
                *state = LinkState::Idle;
                drop(state);
                worker.close();
                return;
            }
            *state = LinkState::Connected(Arc::clone(&worker));
        }

        log::debug!("Connected to {}", self.sock.display());

        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise(worker, err_rx).await });
    }

    async fn supervise(
        self: Arc<Self>,
        worker: Arc<WriterWorker>,
        mut errors: mpsc::Receiver<sock_packet::Error>,
    ) {
        tokio::select! {
            err = errors.recv() => match err {
                Some(e) => log::warn!("Connection to {} failed: {}", self.sock.display(), e),
                None => log::debug!("Writer for {} stopped", self.sock.display()),
            },
            _ = self.shutdown.wait() => {}
        }

        {
            let mut state = self.state.lock();
            let current = matches!(&*state, LinkState::Connected(w) if Arc::ptr_eq(w, &worker));
            if current {
                *state = LinkState::Idle;
            }
        }

        worker.close();
        log::debug!("Disconnected from {}", self.sock.display());
    }

    fn set_idle(&self) {
        *self.state.lock() = LinkState::Idle;
    }
}

impl fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputWriter")
            .field("filter", &self.filter)
            .field("sock", &self.sock)
            .field("status", &self.link_status())
            .finish()
    }
}

/// Build the routing table from configured output routes
pub fn build_router(
    routes: &[OutputRoute],
    scope: &Shutdown,
    queue_capacity: Option<usize>,
) -> Result<Router<OutputWriter>> {
    let mut table = Vec::with_capacity(routes.len());
    for route in routes {
        let filter = route.filter_net()?;
        table.push((
            filter,
            OutputWriter::new(filter, &route.sock, scope, queue_capacity),
        ));
    }
    Ok(Router::new(table))
}

/// Read packets from the TUN device and dispatch them until shutdown
pub async fn run_output<T>(
    tun: Arc<T>,
    router: Arc<Router<OutputWriter>>,
    pool: BufferPool,
    shutdown: Shutdown,
) -> Result<()>
where
    T: TunTransport + ?Sized,
{
    log::info!(
        "Routing packets from {} to {} output route(s)",
        tun.name(),
        router.len()
    );

    loop {
        let mut buf = pool.acquire();

        let read = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            read = tun.recv(buf.storage_mut()) => read,
        };

        let n = match read {
            Ok(n) => n,
            Err(e) => {
                log::warn!("TUN read failed: {}", e);
                drop(buf);
                if !shutdown.random_backoff().await {
                    break;
                }
                continue;
            }
        };
        buf.set_len(n);

        if n < HEADER_LEN || !ipv4::is_ipv4(&buf) {
            log::trace!("Dropping {} byte non-IPv4 packet from TUN", n);
            continue;
        }

        let Some(dst) = ipv4::destination(&buf) else {
            continue;
        };

        match router.resolve(dst) {
            Some(writer) => writer.write(buf),
            None => log::trace!("No route for {}", dst),
        }
    }

    log::info!("Output loop stopped");
    Ok(())
}
