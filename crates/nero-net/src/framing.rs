//! Length-prefixed frame read/write.
//!
//! Every frame is a 4-byte big-endian length followed by the payload.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::TransportError;

/// Largest accepted frame: a maximum-size record plus envelope overhead.
pub const MAX_FRAME_SIZE: usize = nero_core::MAX_RECORD_SIZE + 64 * 1024;

/// Writes one frame.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(data.len()));
    }
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}
