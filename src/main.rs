//! dataserver: TCP data server and client example.
//!
//! Server role: registers a READ request, stores what the client uploads,
//! then registers a WRITE request with the same name that sends it back.
//!
//! Client role: uploads a short message in chunks, then downloads it again.

mod config;

use bytes::{Bytes, BytesMut};
use config::{Config, Role};
use dataserver::{chunked, client, Error, Handler, Kind, Server, StartPacket, UNKNOWN_SIZE};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Delay before retrying a registration that is still pending
const REGISTER_RETRY: Duration = Duration::from_millis(250);

/// Attempts the client makes to download before giving up
const DOWNLOAD_ATTEMPTS: usize = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        role = ?config.role,
        name = %config.name,
        handshake_timeout_ms = config.handshake_timeout.as_millis() as u64,
        chunk_size = config.chunk_size,
        "Starting dataserver"
    );

    match config.role {
        Role::Server => run_server(config).await,
        Role::Client => run_client(config).await,
    }
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Arc::new(Server::bind_with(&config.listen, config.server_options()).await?);
    let upload = StartPacket::new(Kind::Read, &config.name, UNKNOWN_SIZE);

    // Keep one upload request pending at all times
    loop {
        let handler = upload_handler(
            Arc::downgrade(&server),
            config.name.clone(),
            config.chunk_size,
        );
        match server.register(&upload, handler) {
            Ok(()) => debug!(name = %config.name, "Upload request registered"),
            Err(Error::DuplicateRegistration(_)) => tokio::time::sleep(REGISTER_RETRY).await,
            Err(e) => return Err(e.into()),
        }
    }
}

fn upload_handler(server: Weak<Server>, name: String, chunk_size: usize) -> Handler {
    Handler::read(move |packet, mut reader| async move {
        info!(fingerprint = %packet.fingerprint, "Ready to read data");

        let mut data = BytesMut::new();
        if let Err(e) = chunked::read_to_end(&mut reader, &mut data, chunk_size).await {
            warn!(error = %e, "Upload failed");
            return;
        }
        info!(bytes = data.len(), "Upload done");

        let Some(server) = server.upgrade() else {
            return;
        };
        let download = StartPacket::new(Kind::Write, &name, UNKNOWN_SIZE);
        if let Err(e) = server.register(&download, download_handler(data.freeze(), chunk_size)) {
            warn!(error = %e, "Failed to register download request");
        }
    })
}

fn download_handler(data: Bytes, chunk_size: usize) -> Handler {
    Handler::write(move |packet, mut writer| async move {
        info!(fingerprint = %packet.fingerprint, bytes = data.len(), "Ready to write data");
        match chunked::write_chunked(&mut writer, &data, chunk_size).await {
            Ok(()) => info!("Download done"),
            Err(e) => warn!(error = %e, "Download failed"),
        }
    })
}

async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut message = BytesMut::new();
    for i in 0..10 {
        message.extend_from_slice(format!("Hello, server - {}!", i).as_bytes());
    }
    message.extend_from_slice(b"Bye!");

    let upload = StartPacket::new(Kind::Read, &config.name, UNKNOWN_SIZE);
    let mut stream = client::connect(&config.remote, &upload).await?;
    info!(remote = %config.remote, bytes = message.len(), "Write using chunks");
    chunked::write_chunked(&mut stream, &message, config.chunk_size).await?;
    drop(stream);

    // The server registers the download once it has the whole upload, so
    // an early connection may be turned away.
    let download = StartPacket::new(Kind::Write, &config.name, UNKNOWN_SIZE);
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        let mut stream = client::connect(&config.remote, &download).await?;
        let mut received = BytesMut::new();
        chunked::read_to_end(&mut stream, &mut received, config.chunk_size).await?;

        if !received.is_empty() {
            info!(bytes = received.len(), "Read using chunks");
            println!("{}", String::from_utf8_lossy(&received));
            return Ok(());
        }
        debug!(attempt, "Download not ready");
        tokio::time::sleep(REGISTER_RETRY).await;
    }

    Err("server never served the download".into())
}
