//! Chunked reads and writes over the raw post-handshake stream.

use crate::error::Result;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Append everything `reader` yields to `buf`, reading at most `chunk_size`
/// bytes at a time. End of stream is success; on error `buf` keeps what
/// arrived before it.
pub async fn read_to_end<R>(reader: &mut R, buf: &mut BytesMut, chunk_size: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        trace!(n, "Chunk received");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Write `data` in writes of at most `chunk_size` bytes, then shut down the
/// write side so the peer sees end of stream.
pub async fn write_chunked<W>(writer: &mut W, data: &[u8], chunk_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in data.chunks(chunk_size.max(1)) {
        writer.write_all(chunk).await?;
        trace!(n = chunk.len(), "Chunk sent");
    }
    writer.shutdown().await?;
    Ok(())
}
