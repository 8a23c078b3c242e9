//! TCP data server.
//!
//! Binds a listener, accepts connections and hands each one to its own
//! task. Applications register requests on the [`Server`]; a connection is
//! dispatched to the handler registered for its start packet.

use crate::connection::Connection;
use crate::error::Result;
use crate::handler::{Handler, HandlerKind};
use crate::packet::StartPacket;
use crate::registry::Registry;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time allowed for a client to send its start packet.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read size used when draining a connection for a read-all handler.
pub const CHUNK_LEN: usize = 21;

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Pause after an accept error caused by resource exhaustion
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Tunables for connection handling.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub handshake_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            chunk_size: CHUNK_LEN,
        }
    }
}

/// Server instance
#[derive(Debug)]
pub struct Server {
    registry: Arc<Registry>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

impl Server {
    /// Bind to `addr` with default options and start accepting connections.
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with(addr, ServerOptions::default()).await
    }

    pub async fn bind_with(addr: &str, options: ServerOptions) -> Result<Self> {
        let addr = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address did not resolve")
        })?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Server listening");

        let registry = Arc::new(Registry::new());
        let acceptor = tokio::spawn(accept_loop(listener, Arc::clone(&registry), options));

        Ok(Server {
            registry,
            local_addr,
            acceptor,
        })
    }

    /// Register a handler for the connection that will present `packet`.
    ///
    /// Registration must happen before the client connects. Fails with
    /// [`Error::DuplicateRegistration`](crate::Error::DuplicateRegistration)
    /// while an identical start packet is still pending.
    pub fn register(&self, packet: &StartPacket, handler: Handler) -> Result<()> {
        self.register_wire(&packet.encode(), handler)
    }

    /// Register a handler for an already encoded start packet.
    pub fn register_wire(&self, wire: &[u8], handler: Handler) -> Result<()> {
        self.registry.register(wire, handler)
    }

    /// Withdraw a pending registration. Returns whether one was pending.
    pub fn withdraw(&self, packet: &StartPacket) -> bool {
        self.registry.remove(&packet.key())
    }

    /// Shape of the handler pending for `packet`, if any.
    pub fn lookup(&self, packet: &StartPacket) -> Option<HandlerKind> {
        self.registry.lookup(&packet.key())
    }

    /// Number of registrations waiting for a connection.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections. Connections already accepted keep
    /// running until their handlers return.
    pub fn shutdown(self) {
        info!(address = %self.local_addr, "Server shutting down");
        // Drop aborts the accept loop
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

async fn accept_loop(listener: TcpListener, registry: Arc<Registry>, options: ServerOptions) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "New connection");

                let registry = Arc::clone(&registry);
                let options = options.clone();
                tokio::spawn(async move {
                    Connection::new(peer)
                        .handle(stream, &registry, &options)
                        .await;
                });
            }
            Err(e) if is_resource_exhausted(&e) => {
                warn!(error = %e, "Failed to accept connection, backing off");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
            Err(e) if is_listener_fatal(&e) => {
                error!(error = %e, "Listener failed, no longer accepting connections");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Errors that mean the listening socket itself is unusable. Anything else
/// concerns a single pending connection and accepting continues.
fn is_listener_fatal(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF) | Some(libc::EINVAL) | Some(libc::ENOTSOCK)
    )
}

/// Out of descriptors or buffers. Clears up as connections close.
fn is_resource_exhausted(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
    )
}
