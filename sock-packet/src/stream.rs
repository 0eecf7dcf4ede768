//! Framing for byte streams carrying back-to-back IPv4 datagrams
//!
//! There is no length prefix on the wire: the reader takes the fixed
//! 20-byte header, trusts its total-length field and reads the rest.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer_pool::PacketBuf;
use crate::error::Result;
use crate::ipv4::{self, HEADER_LEN};

/// Read one IPv4 datagram from `reader` into `buf`.
///
/// Returns `Ok(true)` with `buf` holding the datagram, or `Ok(false)` when
/// the stream ended cleanly on a packet boundary. A stream that ends inside
/// a packet yields an `UnexpectedEof` I/O error; a header that is not IPv4
/// or declares fewer than 20 bytes yields a framing error. In every error
/// case the stream is no longer aligned and should be closed.
pub async fn read_packet<R>(reader: &mut R, buf: &mut PacketBuf) -> Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    buf.set_len(0);
    let storage = buf.storage_mut();

    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut storage[filled..HEADER_LEN]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let total = ipv4::declared_length(&storage[..HEADER_LEN])?;
    reader.read_exact(&mut storage[HEADER_LEN..total]).await?;

    buf.set_len(total);
    Ok(true)
}
