//! muxd: a multiplexing JSON request server
//!
//! A single reactor thread multiplexes every client connection with
//! readiness polling (epoll/kqueue via mio) and hands parsed HTTP/1.1
//! requests to a fixed worker pool.
//!
//! Features:
//! - Pipelined requests answered strictly in order per connection
//! - Bounded read/write buffers with write backpressure
//! - Idle and dead-peer detection
//! - Prometheus-style metrics endpoint
//! - Configuration via CLI arguments or TOML file

mod config;
mod handler;
mod metrics;
mod protocols;
mod runtime;
mod server;
mod service;
mod shutdown;

use config::Config;
use server::Server;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!(
        listen = %config.listen,
        workers = config.worker_count,
        max_connections = config.max_connections,
        timeout_secs = config.connection_timeout.as_secs(),
        max_read_buffer = config.max_read_buffer_size,
        shutdown_policy = ?config.shutdown_policy,
        "Starting muxd server"
    );

    let mut server = Server::new(config);

    let token = server.shutdown_token();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Err(e) = shutdown::watch_signals(token) {
                error!(error = %e, "Signal handling unavailable");
            }
        })?;

    server.run()?;

    let status = server.status();
    info!(requests = status.requests_total, "Shutdown complete");
    Ok(())
}
