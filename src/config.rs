//! Configuration for the dataserver binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use dataserver::{ServerOptions, CHUNK_LEN};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the protocol to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Accept uploads and serve them back
    Server,
    /// Upload a message, then download it again
    Client,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "dataserver")]
#[command(author = "dataserver authors")]
#[command(version = "0.1.0")]
#[command(about = "Simple TCP data server and client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run as server or client
    #[arg(short, long, value_enum, default_value_t = Role::Server)]
    pub role: Role,

    /// Address to bind to (e.g., 127.0.0.1:8089)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Server address to connect to
    #[arg(long)]
    pub remote: Option<String>,

    /// Request name both sides derive the start packet fingerprint from
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Time a client has to send its start packet, in milliseconds
    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Read and write chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            name: default_name(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8089".to_string()
}

fn default_remote() -> String {
    "127.0.0.1:8089".to_string()
}

fn default_name() -> String {
    "start".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_chunk_size() -> usize {
    CHUNK_LEN
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub listen: String,
    pub remote: String,
    pub name: String,
    pub handshake_timeout: Duration,
    pub chunk_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over TOML values (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            role: cli.role,
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            remote: cli.remote.unwrap_or(toml_config.client.remote),
            name: cli.name.unwrap_or(toml_config.client.name),
            handshake_timeout: Duration::from_millis(
                cli.handshake_timeout_ms
                    .unwrap_or(toml_config.server.handshake_timeout_ms),
            ),
            chunk_size: cli.chunk_size.unwrap_or(toml_config.server.chunk_size),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            handshake_timeout: self.handshake_timeout,
            chunk_size: self.chunk_size,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, toml::de::Error),
}
