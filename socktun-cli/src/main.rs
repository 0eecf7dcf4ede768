//! socktun CLI
//!
//! Runs the packet router from a configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use socktun_engine::{Config, RouterEngine};

/// How long the router gets to wind down after a signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// socktun - user-space IPv4 router between a TUN device and Unix sockets
#[derive(Parser, Debug)]
#[command(name = "socktun")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "socktun.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match (cli.command, cli.config) {
        (Some(Commands::GenConfig { output }), _) => generate_config(&output),
        (None, Some(config)) => run(&config).await,
        (None, None) => Err(anyhow!(
            "no configuration file given (try `socktun gen-config`)"
        )),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = RouterEngine::new(config).context("Invalid configuration")?;

    info!("Configuration loaded from {:?}", config_path);

    let shutdown = engine.shutdown_handle();
    let mut engine_handle = tokio::spawn(async move { engine.run().await });

    tokio::select! {
        received = wait_for_shutdown() => {
            received?;
            info!("Shutting down...");
            shutdown.trigger();
        }
        finished = &mut engine_handle => {
            return router_outcome(finished.context("Router task failed")?);
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, engine_handle).await {
        Ok(finished) => router_outcome(finished.context("Router task failed")?),
        Err(_) => Err(anyhow!(
            "router did not stop within {:?} of the shutdown signal",
            SHUTDOWN_GRACE
        )),
    }
}

fn router_outcome(result: socktun_engine::Result<()>) -> Result<()> {
    if let Err(e) = &result {
        if e.needs_privileges() {
            warn!("Opening the TUN device needs root or CAP_NET_ADMIN");
        }
    }
    result.context("Router stopped with an error")
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))
}

fn generate_config(output: &Path) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the socket paths and filters before running.");

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to register SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
