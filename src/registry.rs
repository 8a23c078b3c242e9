//! Registry of requests waiting for a connection.
//!
//! Maps an encoded start packet to the handler registered for it. Each
//! entry is consumed by at most one connection: the connection handler
//! removes the entry in the same critical section that finds it.

use crate::error::{Error, Result};
use crate::handler::{Handler, HandlerKind};
use crate::packet::{RequestKey, StartPacket};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Thread-safe request registry
#[derive(Debug, Default)]
pub struct Registry {
    requests: RwLock<HashMap<RequestKey, Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an encoded start packet.
    ///
    /// Fails without touching the registry if the encoding is not exactly
    /// [`START_PACKET_LEN`](crate::START_PACKET_LEN) bytes, does not
    /// decode, or is already registered.
    pub fn register(&self, wire: &[u8], handler: Handler) -> Result<()> {
        let key = RequestKey::try_from(wire)?;
        let packet = StartPacket::decode(key.as_bytes())?;

        let mut requests = self.write();
        if requests.contains_key(&key) {
            return Err(Error::DuplicateRegistration(packet.fingerprint));
        }
        trace!(
            fingerprint = %packet.fingerprint,
            kind = ?packet.kind,
            handler = ?handler.kind(),
            "Request registered"
        );
        requests.insert(key, handler);
        Ok(())
    }

    /// Shape of the handler registered under `key`, if any.
    pub fn lookup(&self, key: &RequestKey) -> Option<HandlerKind> {
        self.read().get(key).map(Handler::kind)
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.read().contains_key(key)
    }

    /// Remove and return the handler registered under `key`.
    pub fn take(&self, key: &RequestKey) -> Option<Handler> {
        self.write().remove(key)
    }

    /// Remove the entry for `key`. Returns whether one was present.
    pub fn remove(&self, key: &RequestKey) -> bool {
        self.take(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Callbacks never run while the lock is held, so a poisoned lock still
    // guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<RequestKey, Handler>> {
        self.requests.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RequestKey, Handler>> {
        self.requests.write().unwrap_or_else(PoisonError::into_inner)
    }
}
