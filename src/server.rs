//! Server lifecycle.
//!
//! Binds the listener, builds the reactor and worker pool, and runs the
//! reactor on its own thread. Startup faults surface from [`Server::start`]
//! before any thread is spawned.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::runtime::socket::bind_listener;
use crate::runtime::Reactor;
use crate::service::Service;
use crate::shutdown::ShutdownToken;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("failed to initialize reactor: {0}")]
    Init(#[source] io::Error),
    #[error("failed to spawn reactor thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server has been stopped")]
    Stopped,
    #[error("reactor failed: {0}")]
    Reactor(#[source] io::Error),
    #[error("reactor thread panicked")]
    ReactorPanicked,
}

/// Point-in-time view of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub running: bool,
    pub local_addr: Option<SocketAddr>,
    pub active_connections: u64,
    pub requests_total: u64,
}

pub struct Server {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    service: Arc<Service>,
    shutdown: ShutdownToken,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    reactor: Option<JoinHandle<io::Result<()>>>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            config: Arc::new(config),
            service: Arc::new(Service::new(Arc::clone(&metrics))),
            metrics,
            shutdown: ShutdownToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            reactor: None,
        }
    }

    /// Token that stops the server when triggered. Safe to hand to signal
    /// handlers on other threads.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Bind, build the reactor and start it in the background.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.reactor.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        if self.shutdown.is_triggered() {
            return Err(ServerError::Stopped);
        }

        let addr = self.config.listen;
        let listener = bind_listener(addr, self.config.backlog)
            .map_err(|source| ServerError::Bind { addr, source })?;

        let reactor = Reactor::new(
            Arc::clone(&self.config),
            listener,
            Arc::clone(&self.service),
            Arc::clone(&self.metrics),
            self.shutdown.clone(),
        )
        .map_err(ServerError::Init)?;
        let local_addr = reactor.local_addr().map_err(ServerError::Init)?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || {
                let result = reactor.run();
                running.store(false, Ordering::SeqCst);
                result
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ServerError::Spawn(e)
            })?;

        self.local_addr = Some(local_addr);
        self.reactor = Some(handle);
        info!(addr = %local_addr, "Server listening");
        Ok(())
    }

    /// Start and block until the reactor exits.
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.start()?;
        self.wait()
    }

    /// Trigger shutdown and wait for the reactor to finish. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.trigger();
        if let Err(e) = self.wait() {
            error!(error = %e, "Reactor exited with error");
        }
    }

    fn wait(&mut self) -> Result<(), ServerError> {
        let Some(handle) = self.reactor.take() else {
            return Ok(());
        };
        let result = match handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerError::Reactor(e)),
            Err(_) => Err(ServerError::ReactorPanicked),
        };
        self.running.store(false, Ordering::SeqCst);
        info!("Server stopped");
        result
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn status(&self) -> ServerStatus {
        let snapshot = self.metrics.snapshot();
        ServerStatus {
            running: self.running.load(Ordering::SeqCst),
            local_addr: self.local_addr,
            active_connections: snapshot.active_connections,
            requests_total: snapshot.requests_total,
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
