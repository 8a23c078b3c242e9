//! Client side of the data server protocol.
//!
//! A client dials the server, sends a start packet and then streams raw
//! bytes in the direction the packet's kind implies, using the helpers in
//! [`chunked`](crate::chunked) or plain tokio I/O.

use crate::error::Result;
use crate::packet::StartPacket;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Connect to the server at `addr` and send `packet`.
///
/// The returned stream is positioned after the start packet. If the start
/// packet cannot be written the connection is closed before the error is
/// returned.
pub async fn connect(addr: &str, packet: &StartPacket) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    debug!(
        remote = %addr,
        fingerprint = %packet.fingerprint,
        kind = ?packet.kind,
        "Connected"
    );

    if let Err(e) = stream.write_all(&packet.encode()).await {
        drop(stream);
        return Err(e.into());
    }
    Ok(stream)
}
