//! IPv4 header accessors
//!
//! Only the fields the router needs are exposed. Options, checksums and
//! fragmentation are never inspected; packets pass through byte-for-byte.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Length of an IPv4 header without options
pub const HEADER_LEN: usize = 20;

/// IP version nibble of the first byte
pub fn version(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| b >> 4)
}

/// Whether the packet claims to be IPv4
pub fn is_ipv4(packet: &[u8]) -> bool {
    version(packet) == Some(4)
}

/// Total length field (bytes 2..4, big-endian)
pub fn total_length(packet: &[u8]) -> Option<usize> {
    packet
        .get(2..4)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
}

/// Source address (bytes 12..16)
pub fn source(packet: &[u8]) -> Option<Ipv4Addr> {
    address_at(packet, 12)
}

/// Destination address (bytes 16..20)
pub fn destination(packet: &[u8]) -> Option<Ipv4Addr> {
    address_at(packet, 16)
}

fn address_at(packet: &[u8], offset: usize) -> Option<Ipv4Addr> {
    packet
        .get(offset..offset + 4)
        .map(|b| Ipv4Addr::new(b[0], b[1], b[2], b[3]))
}

/// Validate a header read off a stream and return the datagram length it
/// declares.
///
/// The header must be IPv4 and declare at least [`HEADER_LEN`] bytes.
pub fn declared_length(header: &[u8]) -> Result<usize> {
    if header.len() < HEADER_LEN {
        return Err(Error::PacketTooShort {
            expected: HEADER_LEN,
            actual: header.len(),
        });
    }

    let version = header[0] >> 4;
    if version != 4 {
        return Err(Error::NotIpv4 { version });
    }

    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Err(Error::InvalidLength { length });
    }

    Ok(length)
}
