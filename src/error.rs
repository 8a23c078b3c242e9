//! Error types shared by the server, registry and client.

use crate::packet::Fingerprint;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while registering requests or handling connections.
#[derive(Error, Debug)]
pub enum Error {
    /// The start packet did not arrive before the handshake deadline.
    #[error("timed out waiting for start packet")]
    Timeout,

    /// The start packet bytes could not be decoded.
    #[error("malformed start packet: {0}")]
    MalformedHandshake(&'static str),

    /// No request is registered for the received fingerprint.
    #[error("no request registered for fingerprint {0}")]
    UnknownFingerprint(Fingerprint),

    /// A request with this fingerprint is already waiting for a connection.
    #[error("request {0} is already registered")]
    DuplicateRegistration(Fingerprint),

    /// The encoded start packet is not the fixed wire length.
    #[error("incorrect start packet length: expected {expected} bytes, got {actual}")]
    HandshakeLengthMismatch { expected: usize, actual: usize },

    /// Socket error while binding, accepting or streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
