//! Length-prefixed framing for the message channel
//!
//! Each frame is a 4-byte big-endian length followed by the envelope bytes.
//! Reads enforce an upper bound so a hostile peer cannot ask for an
//! arbitrarily large allocation.

use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Write a single length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len: u32 = payload.len().try_into().map_err(|_| Error::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    trace!(len, "writing frame");
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single length-prefixed frame, enforcing `max_frame_bytes`.
///
/// Returns `Ok(None)` when the stream ends cleanly before a length prefix.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < 4 {
        reader.read_exact(&mut len_buf[n..]).await?;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(Error::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    trace!(len, "reading frame");
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
