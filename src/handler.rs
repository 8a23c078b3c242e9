//! Request handlers.
//!
//! A handler is registered together with a start packet and is invoked at
//! most once, by the connection that presents the matching start packet.
//! Three shapes are supported:
//!
//! - [`Handler::Read`]: receives the read half of the connection and pulls
//!   the client's data itself.
//! - [`Handler::Write`]: receives the write half and pushes data to the
//!   client. Returning from the callback ends the stream.
//! - [`Handler::ReadAll`]: the server drains the connection to end of
//!   stream and hands the callback the complete buffer.

use crate::error::Result;
use crate::packet::StartPacket;
use bytes::BytesMut;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Future returned by a handler callback.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub type ReadCallback = Box<dyn FnOnce(StartPacket, OwnedReadHalf) -> HandlerFuture + Send>;

pub type WriteCallback = Box<dyn FnOnce(StartPacket, OwnedWriteHalf) -> HandlerFuture + Send>;

pub type ReadAllCallback = Box<dyn FnOnce(BytesMut, Result<()>) -> HandlerFuture + Send>;

/// A registered callback.
///
/// Callbacks only need to be `Send`. The `Mutex` gives the shared registry
/// a `Sync` handler and is unwrapped once, after the handler is taken out.
pub enum Handler {
    Read(Mutex<ReadCallback>),
    Write(Mutex<WriteCallback>),
    ReadAll(Mutex<ReadAllCallback>),
}

/// Which shape a [`Handler`] has, without the callback itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Read,
    Write,
    ReadAll,
}

impl Handler {
    /// Handler that reads the client's data from the connection.
    pub fn read<F, Fut>(callback: F) -> Self
    where
        F: FnOnce(StartPacket, OwnedReadHalf) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ReadCallback =
            Box::new(move |packet: StartPacket, reader: OwnedReadHalf| -> HandlerFuture {
                Box::pin(callback(packet, reader))
            });
        Handler::Read(Mutex::new(callback))
    }

    /// Handler that writes data to the client.
    pub fn write<F, Fut>(callback: F) -> Self
    where
        F: FnOnce(StartPacket, OwnedWriteHalf) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: WriteCallback =
            Box::new(move |packet: StartPacket, writer: OwnedWriteHalf| -> HandlerFuture {
                Box::pin(callback(packet, writer))
            });
        Handler::Write(Mutex::new(callback))
    }

    /// Handler that receives everything the client sent, once the client
    /// closes its side. The result is `Ok(())` on a clean end of stream.
    pub fn read_all<F, Fut>(callback: F) -> Self
    where
        F: FnOnce(BytesMut, Result<()>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ReadAllCallback =
            Box::new(move |buf: BytesMut, result: Result<()>| -> HandlerFuture {
                Box::pin(callback(buf, result))
            });
        Handler::ReadAll(Mutex::new(callback))
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Read(_) => HandlerKind::Read,
            Handler::Write(_) => HandlerKind::Write,
            Handler::ReadAll(_) => HandlerKind::ReadAll,
        }
    }
}

/// Unwrap a callback taken out of the registry.
pub(crate) fn into_callback<F>(slot: Mutex<F>) -> F {
    slot.into_inner().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Kind, RequestKey};
    use crate::registry::Registry;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_handler_kind() {
        assert_eq!(Handler::read(|_, _| async {}).kind(), HandlerKind::Read);
        assert_eq!(Handler::write(|_, _| async {}).kind(), HandlerKind::Write);
        assert_eq!(
            Handler::read_all(|_, _| async {}).kind(),
            HandlerKind::ReadAll
        );
    }

    #[test]
    fn test_handler_debug() {
        let handler = Handler::read_all(|_, _| async {});
        assert_eq!(format!("{:?}", handler), "Handler(ReadAll)");
    }

    #[test]
    fn test_callback_state_need_not_be_sync() {
        let state = Cell::new(0u32);
        let handler = Handler::read_all(move |buf, _| async move {
            state.set(buf.len() as u32);
        });

        let packet = StartPacket::new(Kind::Read, "start", -1);
        let registry = Arc::new(Registry::new());
        registry.register(&packet.encode(), handler).unwrap();

        let shared = Arc::clone(&registry);
        let taken = thread::spawn(move || shared.take(&RequestKey::from(packet.encode())))
            .join()
            .unwrap()
            .unwrap();

        match taken {
            Handler::ReadAll(slot) => {
                let callback = into_callback(slot);
                tokio_test::block_on(callback(BytesMut::from(&b"abc"[..]), Ok(())));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(registry.is_empty());
    }
}
