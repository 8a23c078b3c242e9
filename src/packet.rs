//! Start packet codec.
//!
//! Every connection begins with a fixed-length start packet that tells the
//! server which registered request the connection is for:
//!
//! ```text
//! +------+-------------------------+--------------------------+
//! | kind | object size (i64, LE)   | fingerprint              |
//! +------+-------------------------+--------------------------+
//!  1 byte        8 bytes                   16 bytes
//! ```
//!
//! - `kind` 0 is READ (the server receives data), 1 is WRITE (the server
//!   sends data).
//! - `object size` is the declared payload size, `-1` when unknown.
//! - `fingerprint` is a truncated SHA-256 of the request name. The name
//!   itself never goes over the wire.
//!
//! After the start packet the connection carries raw bytes until the sender
//! closes it.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 16;

/// Kind byte plus object size.
pub const HEADER_LEN: usize = 1 + 8;

/// Total encoded length of a start packet.
pub const START_PACKET_LEN: usize = HEADER_LEN + FINGERPRINT_LEN;

/// Object size value meaning "not declared".
pub const UNKNOWN_SIZE: i64 = -1;

/// Operation requested by the client, seen from the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// Server will receive data from the client.
    Read = 0,
    /// Server will send data to the client.
    Write = 1,
}

impl Kind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Kind {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Kind::Read),
            1 => Ok(Kind::Write),
            _ => Err(Error::MalformedHandshake("unknown operation kind")),
        }
    }
}

/// Fixed-width hash of a request name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Hash a request name. Client and server derive the same value for
    /// the same name.
    pub fn of(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        Fingerprint(bytes)
    }

    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Fingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Copy the fingerprint region out of an encoded start packet.
    pub(crate) fn from_wire(wire: &[u8; START_PACKET_LEN]) -> Self {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&wire[HEADER_LEN..]);
        Fingerprint(bytes)
    }
}

impl TryFrom<&[u8]> for Fingerprint {
    type Error = Error;

    fn try_from(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; FINGERPRINT_LEN] =
            slice
                .try_into()
                .map_err(|_| Error::HandshakeLengthMismatch {
                    expected: FINGERPRINT_LEN,
                    actual: slice.len(),
                })?;
        Ok(Fingerprint(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Registry key: a complete encoded start packet.
///
/// A connection matches a registration only if kind, object size and
/// fingerprint are all identical, so READ and WRITE requests for the same
/// name are independent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey([u8; START_PACKET_LEN]);

impl RequestKey {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_wire(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; START_PACKET_LEN] {
        &self.0
    }
}

impl From<[u8; START_PACKET_LEN]> for RequestKey {
    fn from(wire: [u8; START_PACKET_LEN]) -> Self {
        RequestKey(wire)
    }
}

impl TryFrom<&[u8]> for RequestKey {
    type Error = Error;

    fn try_from(slice: &[u8]) -> Result<Self> {
        let wire: [u8; START_PACKET_LEN] =
            slice
                .try_into()
                .map_err(|_| Error::HandshakeLengthMismatch {
                    expected: START_PACKET_LEN,
                    actual: slice.len(),
                })?;
        Ok(RequestKey(wire))
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestKey({})", hex::encode(self.0))
    }
}

/// Decoded start packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPacket {
    pub kind: Kind,
    /// Declared payload size, [`UNKNOWN_SIZE`] when not known.
    pub object_size: i64,
    pub fingerprint: Fingerprint,
}

impl StartPacket {
    /// Build a start packet for a named request.
    pub fn new(kind: Kind, name: &str, object_size: i64) -> Self {
        Self::with_fingerprint(kind, Fingerprint::of(name), object_size)
    }

    pub fn with_fingerprint(kind: Kind, fingerprint: Fingerprint, object_size: i64) -> Self {
        StartPacket {
            kind,
            object_size,
            fingerprint,
        }
    }

    /// Encode into the fixed-length wire form.
    pub fn encode(&self) -> [u8; START_PACKET_LEN] {
        let mut wire = [0u8; START_PACKET_LEN];
        let mut out = &mut wire[..];
        out.put_u8(self.kind.as_byte());
        out.put_i64_le(self.object_size);
        out.put_slice(self.fingerprint.as_bytes());
        wire
    }

    pub fn key(&self) -> RequestKey {
        RequestKey(self.encode())
    }

    /// Decode a start packet. The input must be exactly
    /// [`START_PACKET_LEN`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MalformedHandshake("shorter than header"));
        }
        if bytes.len() != START_PACKET_LEN {
            return Err(Error::MalformedHandshake("wrong fingerprint width"));
        }

        let mut buf = bytes;
        let kind = Kind::try_from(buf.get_u8())?;
        let object_size = buf.get_i64_le();
        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        buf.copy_to_slice(&mut fingerprint);

        Ok(StartPacket {
            kind,
            object_size,
            fingerprint: Fingerprint(fingerprint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let packet = StartPacket::new(Kind::Write, "start", 0x0102);
        let wire = packet.encode();

        assert_eq!(wire.len(), START_PACKET_LEN);
        assert_eq!(wire[0], 1);
        assert_eq!(&wire[1..9], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&wire[9..], Fingerprint::of("start").as_bytes());
    }

    #[test]
    fn test_unknown_size_encoding() {
        let wire = StartPacket::new(Kind::Read, "start", UNKNOWN_SIZE).encode();
        assert_eq!(&wire[1..9], &[0xff; 8]);
    }

    #[test]
    fn test_decode_roundtrip() {
        let fingerprints = [
            Fingerprint::of("start"),
            Fingerprint::of("archive/2023.tar"),
            Fingerprint::of(""),
            Fingerprint::from_bytes([0; FINGERPRINT_LEN]),
            Fingerprint::from_bytes([0xff; FINGERPRINT_LEN]),
        ];
        let sizes = [i64::MIN, UNKNOWN_SIZE, 0, 1, i64::MAX];

        for kind in [Kind::Read, Kind::Write] {
            for fingerprint in fingerprints {
                for size in sizes {
                    let packet = StartPacket::with_fingerprint(kind, fingerprint, size);
                    let wire = packet.encode();
                    assert_eq!(StartPacket::decode(&wire).unwrap(), packet);
                    assert_eq!(RequestKey::from(wire).fingerprint(), fingerprint);
                }
            }
        }
    }

    #[test]
    fn test_encoded_length_is_fixed() {
        let short = StartPacket::new(Kind::Read, "", 0).encode();
        let long = StartPacket::new(Kind::Write, &"x".repeat(4096), -1).encode();
        assert_eq!(short.len(), long.len());
    }

    #[test]
    fn test_decode_short_input() {
        match StartPacket::decode(&[0, 1, 2]) {
            Err(Error::MalformedHandshake(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(StartPacket::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_wrong_length() {
        let wire = StartPacket::new(Kind::Read, "start", -1).encode();

        assert!(matches!(
            StartPacket::decode(&wire[..START_PACKET_LEN - 1]),
            Err(Error::MalformedHandshake(_))
        ));

        let mut long = wire.to_vec();
        long.push(0);
        assert!(matches!(
            StartPacket::decode(&long),
            Err(Error::MalformedHandshake(_))
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let mut wire = StartPacket::new(Kind::Read, "start", -1).encode();
        wire[0] = 7;
        assert!(matches!(
            StartPacket::decode(&wire),
            Err(Error::MalformedHandshake("unknown operation kind"))
        ));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(Fingerprint::of("start"), Fingerprint::of("start"));
        assert_ne!(Fingerprint::of("start"), Fingerprint::of("Start"));
        assert_eq!(Fingerprint::of("start").to_string().len(), FINGERPRINT_LEN * 2);
    }

    #[test]
    fn test_fingerprint_from_slice() {
        let fp = Fingerprint::of("start");
        assert_eq!(Fingerprint::try_from(&fp.as_bytes()[..]).unwrap(), fp);

        match Fingerprint::try_from(&[0u8; 4][..]) {
            Err(Error::HandshakeLengthMismatch { expected, actual }) => {
                assert_eq!(expected, FINGERPRINT_LEN);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_from_wire() {
        let packet = StartPacket::new(Kind::Write, "start", 10);
        assert_eq!(Fingerprint::from_wire(&packet.encode()), packet.fingerprint);
        assert_eq!(packet.key().fingerprint(), packet.fingerprint);
    }

    #[test]
    fn test_request_key() {
        let read = StartPacket::new(Kind::Read, "start", UNKNOWN_SIZE);
        let write = StartPacket::new(Kind::Write, "start", UNKNOWN_SIZE);
        assert_ne!(read.key(), write.key());
        assert_eq!(read.key(), RequestKey::from(read.encode()));

        let wire = read.encode();
        assert_eq!(RequestKey::try_from(&wire[..]).unwrap(), read.key());
        assert!(matches!(
            RequestKey::try_from(&wire[..HEADER_LEN]),
            Err(Error::HandshakeLengthMismatch { expected: START_PACKET_LEN, actual: HEADER_LEN })
        ));
    }
}
