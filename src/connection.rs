//! Connection state machine.
//!
//! Each accepted connection goes through:
//!
//! ```text
//! AwaitingHandshake -> Resolving -> Streaming -> Done
//!         \               \             \
//!          +---------------+-------------+--> Aborted
//! ```
//!
//! The start packet must arrive within the handshake timeout. The matching
//! registration is then taken out of the registry, so a request is served
//! by at most one connection. The stream is closed when handling returns,
//! whatever the outcome.

use crate::chunked;
use crate::error::{Error, Result};
use crate::handler::{into_callback, Handler, HandlerKind};
use crate::packet::{RequestKey, StartPacket, START_PACKET_LEN};
use crate::registry::Registry;
use crate::server::ServerOptions;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the start packet.
    AwaitingHandshake,
    /// Start packet received, resolving it against the registry.
    Resolving,
    /// Connection handed to a handler of the given shape.
    Streaming(HandlerKind),
    /// Handler returned.
    Done,
    /// Handshake failed or timed out.
    Aborted,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    state: ConnState,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: ConnState::AwaitingHandshake,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn transition(&mut self, next: ConnState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Run the connection to completion. Returns the terminal state.
    pub async fn handle(
        mut self,
        stream: TcpStream,
        registry: &Registry,
        options: &ServerOptions,
    ) -> ConnState {
        match self.serve(stream, registry, options).await {
            Ok(()) => {
                self.transition(ConnState::Done);
                debug!(peer = %self.peer, "Connection done");
            }
            Err(e) => {
                self.transition(ConnState::Aborted);
                debug!(peer = %self.peer, error = %e, "Start packet error");
            }
        }
        self.state
    }

    async fn serve(
        &mut self,
        mut stream: TcpStream,
        registry: &Registry,
        options: &ServerOptions,
    ) -> Result<()> {
        let wire = await_start_packet(&mut stream, options.handshake_timeout, registry).await?;

        self.transition(ConnState::Resolving);
        let packet = StartPacket::decode(&wire)?;
        let handler = take_handler(&wire, registry)?;
        trace!(
            peer = %self.peer,
            fingerprint = %packet.fingerprint,
            kind = ?packet.kind,
            object_size = packet.object_size,
            "Start packet accepted"
        );

        self.transition(ConnState::Streaming(handler.kind()));
        match handler {
            Handler::Read(slot) => {
                let (reader, _writer) = stream.into_split();
                into_callback(slot)(packet, reader).await;
            }
            Handler::Write(slot) => {
                let (_reader, writer) = stream.into_split();
                into_callback(slot)(packet, writer).await;
            }
            Handler::ReadAll(slot) => {
                let mut buf = BytesMut::new();
                let result = chunked::read_to_end(&mut stream, &mut buf, options.chunk_size).await;
                trace!(peer = %self.peer, bytes = buf.len(), "Read all done");
                into_callback(slot)(buf, result).await;
            }
        }

        Ok(())
    }
}

/// Read the start packet, giving up after `deadline`.
async fn await_start_packet<R>(
    reader: &mut R,
    deadline: Duration,
    registry: &Registry,
) -> Result<[u8; START_PACKET_LEN]>
where
    R: AsyncRead + Unpin,
{
    let mut wire = [0u8; START_PACKET_LEN];
    let mut filled = 0;

    let outcome =
        tokio::time::timeout(deadline, read_start_packet(reader, &mut wire, &mut filled)).await;
    match outcome {
        Ok(result) => result.map(|()| wire),
        Err(_) => {
            // Unread bytes stay zero, so a partial packet still names a key.
            trace!(filled, "Start packet timed out");
            registry.remove(&RequestKey::from(wire));
            Err(Error::Timeout)
        }
    }
}

/// Fill `wire` from `reader`, tracking progress in `filled` so a timed out
/// read still reports how much arrived.
async fn read_start_packet<R>(
    reader: &mut R,
    wire: &mut [u8; START_PACKET_LEN],
    filled: &mut usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while *filled < START_PACKET_LEN {
        let n = reader.read(&mut wire[*filled..]).await?;
        if n == 0 {
            return Err(Error::MalformedHandshake("connection closed before start packet"));
        }
        *filled += n;
    }
    Ok(())
}

/// Atomically find and remove the handler for a received start packet.
fn take_handler(wire: &[u8; START_PACKET_LEN], registry: &Registry) -> Result<Handler> {
    let key = RequestKey::from(*wire);
    registry
        .take(&key)
        .ok_or_else(|| Error::UnknownFingerprint(key.fingerprint()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Fingerprint, Kind};
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_start_packet_in_pieces() {
        let wire = StartPacket::new(Kind::Read, "start", -1).encode();
        let mut mock = Builder::new()
            .read(&wire[..1])
            .read(&wire[1..12])
            .read(&wire[12..])
            .build();

        let registry = Registry::new();
        let received = await_start_packet(&mut mock, TIMEOUT, &registry)
            .await
            .unwrap();
        assert_eq!(received, wire);
    }

    #[tokio::test]
    async fn test_start_packet_eof() {
        let wire = StartPacket::new(Kind::Read, "start", -1).encode();
        let mut mock = Builder::new().read(&wire[..7]).build();

        let registry = Registry::new();
        match await_start_packet(&mut mock, TIMEOUT, &registry).await {
            Err(Error::MalformedHandshake(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_packet_timeout() {
        let wire = StartPacket::new(Kind::Read, "start", -1).encode();
        let mut mock = Builder::new()
            .read(&wire[..4])
            .wait(Duration::from_secs(30))
            .build();

        let registry = Registry::new();
        registry
            .register(&wire, Handler::read(|_, _| async {}))
            .unwrap();

        match await_start_packet(&mut mock, Duration::from_millis(50), &registry).await {
            Err(Error::Timeout) => {}
            other => panic!("unexpected: {:?}", other),
        }

        // The zero-padded partial packet names a different entry
        assert!(registry.contains(&RequestKey::from(wire)));
    }

    #[tokio::test]
    async fn test_start_packet_timeout_removes_received_key() {
        let zeroed = [0u8; START_PACKET_LEN];
        let mut mock = Builder::new().wait(Duration::from_secs(30)).build();

        let registry = Registry::new();
        registry
            .register(&zeroed, Handler::read_all(|_, _| async {}))
            .unwrap();
        assert_eq!(
            StartPacket::decode(&zeroed).unwrap(),
            StartPacket::with_fingerprint(Kind::Read, Fingerprint::from_bytes([0; 16]), 0)
        );

        match await_start_packet(&mut mock, Duration::from_millis(50), &registry).await {
            Err(Error::Timeout) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!registry.contains(&RequestKey::from(zeroed)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_handler() {
        let registry = Registry::new();
        let wire = StartPacket::new(Kind::Write, "start", -1).encode();
        registry
            .register(&wire, Handler::write(|_, _| async {}))
            .unwrap();

        let handler = take_handler(&wire, &registry).unwrap();
        assert_eq!(handler.kind(), HandlerKind::Write);

        match take_handler(&wire, &registry) {
            Err(Error::UnknownFingerprint(fp)) => {
                assert_eq!(fp, Fingerprint::of("start"));
            }
            other => panic!("unexpected: {:?}", other.map(|h| h.kind())),
        }
    }

    #[test]
    fn test_take_handler_requires_same_kind() {
        let registry = Registry::new();
        let upload = StartPacket::new(Kind::Read, "start", -1);
        registry
            .register(&upload.encode(), Handler::read(|_, _| async {}))
            .unwrap();

        let download = StartPacket::new(Kind::Write, "start", -1).encode();
        assert!(take_handler(&download, &registry).is_err());
        assert!(registry.contains(&upload.key()));
    }

    #[test]
    fn test_initial_state() {
        let conn = Connection::new("127.0.0.1:9".parse().unwrap());
        assert_eq!(conn.state(), ConnState::AwaitingHandshake);
    }
}
