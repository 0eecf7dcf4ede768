//! Error types for packet handling

use std::io;

use thiserror::Error;

/// Result type alias for packet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, validating or writing packets
#[derive(Debug, Error)]
pub enum Error {
    #[error("not an IPv4 packet (version {version})")]
    NotIpv4 { version: u8 },

    #[error("invalid IPv4 total length {length}")]
    InvalidLength { length: usize },

    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("short write: wrote {actual} of {expected} bytes")]
    ShortWrite { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Check if the stream ended in the middle of a packet
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
