//! Configuration module for the muxd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// What the worker pool does with queued tasks when it is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Run every queued task before the workers exit.
    Drain,
    /// Drop queued tasks; only tasks already running complete.
    Discard,
}

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "muxd")]
#[command(author = "muxd authors")]
#[command(version = "0.1.0")]
#[command(about = "A multiplexing JSON request server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Idle seconds before a connection is reclaimed
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Maximum bytes buffered per connection while framing a request
    #[arg(long)]
    pub max_read_buffer: Option<usize>,

    /// Maximum number of simultaneous connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// What to do with queued work at shutdown
    #[arg(long, value_enum)]
    pub shutdown_policy: Option<ShutdownPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener and event loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Pending connection queue length passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum number of registered connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound on a single readiness wait
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Readiness events fetched per wait
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            poll_timeout_ms: default_poll_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Per-connection limits and health checking
#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_max_read_buffer_size")]
    pub max_read_buffer_size: usize,
    #[serde(default = "default_max_write_buffer_size")]
    pub max_write_buffer_size: usize,
    /// Idle seconds before the health monitor closes a connection
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Closed connections kept for reuse
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Framed requests allowed to wait behind the one in flight
    #[serde(default = "default_max_pipeline_depth")]
    pub max_pipeline_depth: usize,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            max_read_buffer_size: default_max_read_buffer_size(),
            max_write_buffer_size: default_max_write_buffer_size(),
            timeout_secs: default_timeout_secs(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_pool_size: default_max_pool_size(),
            max_pipeline_depth: default_max_pipeline_depth(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Deserialize)]
pub struct WorkersSection {
    /// Number of worker threads (0 = number of CPU cores)
    #[serde(default)]
    pub count: usize,
    #[serde(default = "default_shutdown_policy")]
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            count: 0,
            shutdown_policy: default_shutdown_policy(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_connections() -> usize {
    10_000
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_read_buffer_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_write_buffer_size() -> usize {
    4 * 1024 * 1024 // 4 MB
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_health_check_interval_ms() -> u64 {
    1000
}

fn default_max_pool_size() -> usize {
    1024
}

fn default_max_pipeline_depth() -> usize {
    128
}

fn default_shutdown_policy() -> ShutdownPolicy {
    ShutdownPolicy::Drain
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration.
///
/// Read-only once built; the server shares it between the reactor and the
/// worker pool behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub max_connections: usize,
    pub poll_timeout: Duration,
    pub event_capacity: usize,
    pub max_read_buffer_size: usize,
    pub max_write_buffer_size: usize,
    pub connection_timeout: Duration,
    pub health_check_interval: Duration,
    pub max_pool_size: usize,
    pub max_pipeline_depth: usize,
    pub worker_count: usize,
    pub shutdown_policy: ShutdownPolicy,
    pub log_level: String,
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self::resolve(CliArgs::default(), TomlConfig::default()).unwrap()
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args over TOML values.
    pub fn resolve(cli: CliArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let listen_str = cli.listen.unwrap_or(file.server.listen);
        let listen = listen_str
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen_str.clone()))?;

        let worker_count = match cli.workers.unwrap_or(file.workers.count) {
            0 => num_cpus(),
            n => n,
        };

        let log_level = if !cli.log_level.is_empty() && cli.log_level != "info" {
            cli.log_level
        } else {
            file.logging.level
        };

        Ok(Config {
            listen,
            backlog: file.server.backlog,
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            poll_timeout: Duration::from_millis(file.server.poll_timeout_ms.max(1)),
            event_capacity: file.server.event_capacity.max(16),
            max_read_buffer_size: cli
                .max_read_buffer
                .unwrap_or(file.connection.max_read_buffer_size),
            max_write_buffer_size: file.connection.max_write_buffer_size,
            connection_timeout: Duration::from_secs(
                cli.timeout.unwrap_or(file.connection.timeout_secs),
            ),
            health_check_interval: Duration::from_millis(
                file.connection.health_check_interval_ms.max(1),
            ),
            max_pool_size: file.connection.max_pool_size,
            max_pipeline_depth: file.connection.max_pipeline_depth.max(1),
            worker_count,
            shutdown_policy: cli
                .shutdown_policy
                .unwrap_or(file.workers.shutdown_policy),
            log_level,
        })
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
}
