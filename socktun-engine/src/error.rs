//! Engine errors

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that stop the router or keep it from starting
#[derive(Debug, Error)]
pub enum Error {
    /// Semantically invalid setting (bad CIDR, missing socket path)
    #[error("invalid config: {0}")]
    Config(String),

    /// Malformed TOML or an unknown key
    #[error("config syntax: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Packet(#[from] sock_packet::Error),

    #[error("tun: {0}")]
    Tun(#[from] sock_tun::Error),

    /// Failed to bind the input socket
    #[error("failed to listen on {}: {source}", path.display())]
    Listen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A subsystem task panicked or was aborted
    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    /// True for anything a config edit fixes
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
            || matches!(self, Error::Tun(sock_tun::Error::InvalidConfig(_)))
    }

    /// True when the TUN device was refused for lack of privileges
    pub fn needs_privileges(&self) -> bool {
        matches!(self, Error::Tun(e) if e.needs_privileges())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}
