//! Router engine
//!
//! Ties the input listener and the output loop to one TUN device and one
//! shutdown scope, and reports the first failure of either.

use std::sync::Arc;

use sock_packet::{BufferPool, TunTransport};
use sock_tun::TunDevice;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::input::{run_input, InputOptions};
use crate::output::{build_router, run_output};
use crate::shutdown::Shutdown;
use crate::writer::effective_capacity;

/// Packet router bridging a TUN device and peer sockets
///
/// ```ignore
/// let engine = RouterEngine::new(Config::load("socktun.toml")?)?;
/// let shutdown = engine.shutdown_handle();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.trigger();
/// });
/// engine.run().await?;
/// ```
pub struct RouterEngine {
    config: Config,
    shutdown: Shutdown,
    pool: BufferPool,
}

impl RouterEngine {
    /// Create an engine; the configuration is validated before any I/O
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            shutdown: Shutdown::new(),
            pool: BufferPool::global().clone(),
        })
    }

    /// Use a dedicated buffer pool instead of the process-wide one
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle that stops the engine when triggered
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Create the configured TUN device and route until shutdown
    pub async fn run(&self) -> Result<()> {
        let tun_config = self.config.tun.to_tun_config()?;
        let device = TunDevice::create(tun_config).await?;
        self.run_with_tun(Arc::new(device)).await
    }

    /// Route between `tun` and the configured sockets until shutdown.
    ///
    /// When either side stops, the other is told to stop too; the first
    /// error is returned once both have finished.
    pub async fn run_with_tun<T>(&self, tun: Arc<T>) -> Result<()>
    where
        T: TunTransport + ?Sized + 'static,
    {
        let queue_capacity = self.config.writer.queue_capacity;
        let input = InputOptions {
            filter: self.config.input_filter()?,
            sock: self.config.input.sock.clone(),
            queue_capacity,
        };
        // Enough buffers for a full TUN queue without first-packet allocations
        self.pool.prewarm(effective_capacity(queue_capacity));

        let router = Arc::new(build_router(
            &self.config.output,
            &self.shutdown,
            queue_capacity,
        )?);

        log::info!(
            "Starting router on {}: input {}, {} output route(s)",
            tun.name(),
            input.sock.display(),
            router.len()
        );
        for (filter, writer) in router.routes() {
            log::info!("Route {} -> {}", filter, writer.sock().display());
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(run_input(
            Arc::clone(&tun),
            input,
            self.pool.clone(),
            self.shutdown.clone(),
        ));
        tasks.spawn(run_output(
            tun,
            router,
            self.pool.clone(),
            self.shutdown.clone(),
        ));

        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            self.shutdown.trigger();

            if let Err(e) = joined.map_err(Error::from).and_then(|result| result) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    log::warn!("Additional subsystem failure: {}", e);
                }
            }
        }

        log::info!("Router stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RouterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterEngine")
            .field("tun", &self.config.tun.name)
            .field("input", &self.config.input.sock)
            .field("routes", &self.config.output.len())
            .field("stopping", &self.shutdown.is_triggered())
            .finish()
    }
}
