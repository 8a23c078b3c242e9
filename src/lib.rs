//! dataserver: a minimal TCP data transfer server.
//!
//! Applications register a request (a start packet plus a handler) on a
//! [`Server`]. A client connects, sends the matching start packet and then
//! streams raw bytes:
//!
//! - READ requests: the server receives data from the client.
//! - WRITE requests: the server sends data to the client.
//!
//! Each registration is served by at most one connection. Connections that
//! do not send a known start packet within the handshake timeout are closed.

pub mod chunked;
pub mod client;
pub mod connection;
pub mod error;
pub mod handler;
pub mod packet;
pub mod registry;
pub mod server;

pub use error::{Error, Result};
pub use handler::{Handler, HandlerKind};
pub use packet::{Fingerprint, Kind, RequestKey, StartPacket, START_PACKET_LEN, UNKNOWN_SIZE};
pub use server::{Server, ServerOptions, CHUNK_LEN, HANDSHAKE_TIMEOUT};
