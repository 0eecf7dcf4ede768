//! sock-tun errors

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before anything touched the kernel
    #[error("invalid TUN settings: {0}")]
    InvalidConfig(String),

    #[error("{path} not found (is the tun module loaded?)")]
    DeviceNodeMissing { path: &'static str },

    /// The kernel refused to create or describe the interface
    #[error("failed to open TUN device {}", .name.as_deref().unwrap_or("<auto>"))]
    Open {
        name: Option<String>,
        #[source]
        source: io::Error,
    },

    /// Packet read or write on an open device
    #[error("TUN device I/O: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True when running as root or with `CAP_NET_ADMIN` would help
    pub fn needs_privileges(&self) -> bool {
        let source = match self {
            Error::Open { source, .. } | Error::Io(source) => source,
            _ => return false,
        };
        source.kind() == io::ErrorKind::PermissionDenied
    }
}

impl From<Error> for sock_packet::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => sock_packet::Error::Io(e),
            other => sock_packet::Error::Io(io::Error::other(other)),
        }
    }
}
