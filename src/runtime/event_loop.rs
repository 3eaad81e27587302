//! mio event loop implementation.
//!
//! Readiness-based model: a single reactor thread owns the listener, every
//! connection and every write buffer. Parsed requests are handed to the
//! worker pool one at a time per connection, and completions come back over
//! a channel with a `Waker` nudge. Uses epoll on Linux, kqueue on macOS.
//!
//! ## Ordering
//!
//! A connection has at most one request executing. Later frames wait in the
//! connection's pending queue, so responses leave in request order even
//! though different connections are served concurrently.
//!
//! ## Slot reuse
//!
//! Slots are only released at the end of a loop iteration, after every
//! event of the batch has been handled, and never while a task for the slot
//! is still executing. Completions carry the connection generation and are
//! dropped if it no longer matches.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::protocols::http::{Response, StatusCode};
use crate::runtime::connection::{ConnError, ConnState, ConnectionRegistry};
use crate::runtime::health::HealthMonitor;
use crate::runtime::pool::ConnectionPool;
use crate::runtime::task::{Completion, CompletionSender, Task};
use crate::runtime::token::{ConnId, GenerationCounter, LISTENER_TOKEN, WAKER_TOKEN};
use crate::runtime::worker::WorkerPool;
use crate::service::Service;
use crate::shutdown::ShutdownToken;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::fmt::Display;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Readiness flags copied out of a mio event.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    hangup: bool,
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            // A half-close (read side only) is left to the read path so
            // buffered requests are still answered.
            hangup: event.is_error() || (event.is_read_closed() && event.is_write_closed()),
        }
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    ready: Vec<Readiness>,
    listener: TcpListener,
    registry: ConnectionRegistry,
    pool: ConnectionPool,
    workers: WorkerPool,
    completions: Receiver<Completion>,
    sender: CompletionSender,
    service: Arc<Service>,
    metrics: Arc<Metrics>,
    config: Arc<Config>,
    shutdown: ShutdownToken,
    health: HealthMonitor,
    generations: GenerationCounter,
    /// Closed slots to release once the current batch is handled.
    reclaim: Vec<usize>,
}

impl Reactor {
    /// Build the reactor around an already bound listener.
    ///
    /// Creates the poll instance, the waker shared by workers and the
    /// shutdown token, and the worker pool.
    pub fn new(
        config: Arc<Config>,
        listener: std::net::TcpListener,
        service: Arc<Service>,
        metrics: Arc<Metrics>,
        shutdown: ShutdownToken,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        shutdown.attach_waker(Arc::clone(&waker));

        let (tx, completions) = mpsc::channel();
        let workers = WorkerPool::new(config.worker_count, config.shutdown_policy)?;

        Ok(Self {
            events: Events::with_capacity(config.event_capacity),
            ready: Vec::with_capacity(config.event_capacity),
            registry: ConnectionRegistry::new(config.max_connections),
            pool: ConnectionPool::new(config.max_pool_size),
            health: HealthMonitor::new(config.health_check_interval, config.connection_timeout),
            generations: GenerationCounter::new(),
            reclaim: Vec::new(),
            sender: CompletionSender::new(tx, waker),
            poll,
            listener,
            workers,
            completions,
            service,
            metrics,
            config,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until the shutdown token fires, then close every connection and
    /// stop the worker pool.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            workers = self.workers.size(),
            max_connections = self.config.max_connections,
            "Reactor started"
        );

        let result = self.event_loop();
        self.shutdown_all();
        result
    }

    fn event_loop(&mut self) -> io::Result<()> {
        while !self.shutdown.is_triggered() {
            match self.poll.poll(&mut self.events, Some(self.config.poll_timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Poll failed");
                    return Err(e);
                }
            }

            self.dispatch_events();
            self.drain_completions();

            let now = Instant::now();
            if self.health.due(now) {
                self.sweep(now);
            }

            self.reclaim_slots();
        }
        Ok(())
    }

    fn dispatch_events(&mut self) {
        let mut ready = std::mem::take(&mut self.ready);
        ready.extend(self.events.iter().map(Readiness::from));

        for readiness in &ready {
            match readiness.token {
                LISTENER_TOKEN => self.accept_connections(),
                // Completions are drained after every batch regardless.
                WAKER_TOKEN => trace!("Reactor woken"),
                Token(slot) => self.handle_connection_event(slot, *readiness),
            }
        }

        ready.clear();
        self.ready = ready;
    }

    /// Accept until the listener would block.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.registry.is_full() {
            warn!(peer = %peer, "Connection limit reached, rejecting");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = ConnId {
            slot: self.registry.vacant_slot(),
            generation: self.generations.next(),
        };
        let mut conn = self.pool.acquire(stream, peer.to_string(), id);
        if let Err(e) = conn.register(self.poll.registry()) {
            warn!(peer = %peer, error = %e, "Failed to register connection");
            conn.close(self.poll.registry());
            self.pool.release(conn);
            return;
        }

        match self.registry.insert(conn) {
            Ok(slot) => {
                debug_assert_eq!(slot, id.slot);
                self.metrics.connection_opened();
                debug!(conn_id = slot, peer = %peer, "Accepted connection");
            }
            Err(mut conn) => {
                conn.close(self.poll.registry());
                self.pool.release(conn);
            }
        }
    }

    fn handle_connection_event(&mut self, slot: usize, readiness: Readiness) {
        match self.registry.get(slot) {
            Some(conn) if conn.state() == ConnState::Active => {}
            // Stale event for a connection closed earlier in this batch.
            _ => return,
        }

        if readiness.hangup {
            self.close_connection(slot, &"hangup");
            return;
        }

        if readiness.readable {
            let result = match self.registry.get_mut(slot) {
                Some(conn) => conn.read_step(&self.config, &self.metrics),
                None => return,
            };
            match result {
                Ok(frames) => {
                    if frames > 0 {
                        trace!(conn_id = slot, frames, "Framed requests");
                    }
                }
                Err(e) => {
                    self.close_connection(slot, &e);
                    return;
                }
            }
        }

        if readiness.readable || readiness.writable {
            self.pump(slot);
        }
    }

    /// Release the next request to the workers, write what is buffered and
    /// adjust write interest. Closes the connection on any fault or once a
    /// `Connection: close` exchange has been fully written.
    fn pump(&mut self, slot: usize) {
        match self.try_pump(slot) {
            Ok(true) => {}
            Ok(false) => self.close_connection(slot, &"closed after response"),
            Err(e) => self.close_connection(slot, &e),
        }
    }

    /// Returns `Ok(false)` when the connection finished its last exchange.
    fn try_pump(&mut self, slot: usize) -> Result<bool, ConnError> {
        let Some(conn) = self.registry.get_mut(slot) else {
            return Ok(true);
        };
        if conn.state() != ConnState::Active {
            return Ok(true);
        }

        loop {
            while let Some(request) = conn.next_request(&self.config)? {
                let task = Task::new(conn.id(), request);
                let service = Arc::clone(&self.service);
                let metrics = Arc::clone(&self.metrics);
                let sender = self.sender.clone();
                let job = Box::new(move || sender.send(task.execute(&service, &metrics)));

                if self.workers.submit(job).is_ok() {
                    break;
                }
                // Pool is shutting down: answer in place and keep the order.
                conn.finish_request();
                let response =
                    Response::error(StatusCode::ServiceUnavailable, "Server is shutting down");
                conn.queue_response(&response.encode(), &self.config)?;
            }

            // Dispatch made room in a full pending queue: take in held-back
            // input and dispatch again if that produced the next request.
            if conn.resume_input(&self.config, &self.metrics)? == 0 {
                break;
            }
        }

        conn.flush(&self.metrics)?;
        conn.update_interest(self.poll.registry())?;
        Ok(!conn.should_close())
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            let slot = completion.conn.slot;
            trace!(
                conn_id = slot,
                status = completion.status.as_u16(),
                "Completion received"
            );
            let result = match self.registry.get_mut(slot) {
                Some(conn) if conn.id() == completion.conn => {
                    conn.finish_request();
                    if conn.state() == ConnState::Closed {
                        // Parked until now; free the slot at end of batch.
                        self.reclaim.push(slot);
                        continue;
                    }
                    if completion.close {
                        conn.close_after_flush();
                    }
                    conn.queue_response(&completion.bytes, &self.config)
                }
                _ => {
                    trace!(conn_id = slot, "Dropping completion for a closed connection");
                    continue;
                }
            };

            match result {
                Ok(()) => self.pump(slot),
                Err(e) => self.close_connection(slot, &e),
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        for (slot, reason) in self.health.sweep(&self.registry, now) {
            self.close_connection(slot, &reason);
        }
    }

    /// Close a connection. Idempotent.
    ///
    /// A connection whose request is still executing stays in its slot,
    /// closed, until the completion arrives; otherwise the slot is released
    /// at the end of the current iteration.
    fn close_connection(&mut self, slot: usize, reason: &dyn Display) {
        let Some(conn) = self.registry.get_mut(slot) else {
            return;
        };
        if !conn.close(self.poll.registry()) {
            return;
        }
        self.metrics.connection_closed();
        debug!(
            conn_id = slot,
            peer = %conn.peer(),
            reason = %reason,
            lifetime_ms = conn.created_at().elapsed().as_millis() as u64,
            "Connection closed"
        );
        if !conn.in_flight() {
            self.reclaim.push(slot);
        }
    }

    fn reclaim_slots(&mut self) {
        for slot in self.reclaim.drain(..) {
            let releasable = self
                .registry
                .get(slot)
                .is_some_and(|c| c.state() == ConnState::Closed && !c.in_flight());
            if releasable {
                if let Some(conn) = self.registry.remove(slot) {
                    self.pool.release(conn);
                }
            }
        }
    }

    fn shutdown_all(&mut self) {
        let slots = self.registry.active_slots();
        info!(connections = slots.len(), "Closing connections");
        for slot in slots {
            self.close_connection(slot, &"server shutdown");
        }

        let discarded = self.workers.shutdown();
        // Drained tasks have completed; free their parked slots.
        while let Ok(completion) = self.completions.try_recv() {
            if let Some(conn) = self.registry.get_mut(completion.conn.slot) {
                if conn.id() == completion.conn {
                    conn.finish_request();
                    self.reclaim.push(completion.conn.slot);
                }
            }
        }
        self.reclaim_slots();

        let (created, reused) = self.pool.stats();
        info!(
            discarded,
            pooled = self.pool.available(),
            created,
            reused,
            "Reactor stopped"
        );
    }
}
