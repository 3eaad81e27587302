//! Connection state machine for managing TCP connections.
//!
//! Each connection owns its socket, a read buffer that frames pipelined
//! requests, a write buffer drained under backpressure, and the queue of
//! frames waiting behind the single request allowed in flight.
//!
//! Lifecycle: `New` -> `Active` (registered) -> `Closed`, then back to `New`
//! when the pool hands the object out again.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::protocols::http::{parse_frame, FrameResult, Request, Response, StatusCode};
use crate::runtime::token::ConnId;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry};
use slab::Slab;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Bytes requested from the socket per receive call.
const READ_CHUNK: usize = 16 * 1024;

/// Buffers grown past this are replaced rather than kept when recycled.
const RETAIN_CAPACITY: usize = 64 * 1024;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Fresh or recycled, not yet registered.
    New,
    /// Registered with the reactor.
    Active,
    /// Socket shut down and deregistered.
    Closed,
}

/// Faults that end a connection.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("connection is not open")]
    NotOpen,
    #[error("frame of {required} bytes exceeds limit of {limit}")]
    FrameTooLarge { required: usize, limit: usize },
    #[error("write buffer limit of {limit} bytes exceeded")]
    WriteBufferFull { limit: usize },
    #[error("socket accepted zero bytes")]
    WriteZero,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A framed unit waiting for its turn to be answered.
#[derive(Debug)]
pub enum Pending {
    /// Needs the worker pool.
    Request(Request),
    /// Already answered (malformed frame); written when its turn comes.
    Immediate(Response),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    id: ConnId,
    peer: String,
    state: ConnState,
    read_buf: BytesMut,
    write_buf: BytesMut,
    pending: VecDeque<Pending>,
    /// A request of this connection is executing on the worker pool.
    in_flight: bool,
    /// A `Connection: close` request was framed; later input is discarded.
    input_done: bool,
    /// Framing or reading stopped because the pending queue was full.
    input_paused: bool,
    /// Close once the write buffer drains.
    close_after_flush: bool,
    interest: Interest,
    last_activity: Instant,
    created_at: Instant,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// An unattached connection object in the `New` state.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            stream: None,
            id: ConnId {
                slot: usize::MAX,
                generation: 0,
            },
            peer: String::new(),
            state: ConnState::New,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            pending: VecDeque::new(),
            in_flight: false,
            input_done: false,
            input_paused: false,
            close_after_flush: false,
            interest: Interest::READABLE,
            last_activity: now,
            created_at: now,
        }
    }

    /// Attach a freshly accepted socket, clearing every trace of a previous
    /// lifecycle.
    pub fn reset(&mut self, stream: TcpStream, peer: String, id: ConnId) {
        self.recycle();
        let now = Instant::now();
        self.stream = Some(stream);
        self.id = id;
        self.peer = peer;
        self.last_activity = now;
        self.created_at = now;
    }

    /// Drop the socket and clear all per-lifecycle state, keeping buffer
    /// capacity unless it grew unusually large.
    pub fn recycle(&mut self) {
        self.stream = None;
        self.state = ConnState::New;
        self.peer.clear();
        if self.read_buf.capacity() > RETAIN_CAPACITY {
            self.read_buf = BytesMut::new();
        } else {
            self.read_buf.clear();
        }
        if self.write_buf.capacity() > RETAIN_CAPACITY {
            self.write_buf = BytesMut::new();
        } else {
            self.write_buf.clear();
        }
        self.pending.clear();
        self.in_flight = false;
        self.input_done = false;
        self.input_paused = false;
        self.close_after_flush = false;
        self.interest = Interest::READABLE;
    }

    /// Register for read (and hangup) readiness and become `Active`.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no socket attached"))?;
        registry.register(stream, self.id.token(), Interest::READABLE)?;
        self.interest = Interest::READABLE;
        self.state = ConnState::Active;
        Ok(())
    }

    /// Receive until the socket would block, framing after every receive.
    ///
    /// Stops early while the pending queue is full, leaving the rest in the
    /// socket so the peer is pushed back; [`Connection::resume_input`] picks
    /// up from there. Returns the number of frames queued. Any error means
    /// the connection must be closed.
    pub fn read_step(&mut self, config: &Config, metrics: &Metrics) -> Result<usize, ConnError> {
        let mut frames = 0;
        loop {
            if self.pipeline_full(config) {
                self.input_paused = true;
                return Ok(frames);
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(ConnError::NotOpen);
            };

            let start = self.read_buf.len();
            self.read_buf.resize(start + READ_CHUNK, 0);
            let result = stream.read(&mut self.read_buf[start..]);
            let n = *result.as_ref().unwrap_or(&0);
            self.read_buf.truncate(start + n);

            match result {
                Ok(0) => return Err(ConnError::PeerClosed),
                Ok(n) => {
                    metrics.bytes_in(n);
                    self.last_activity = Instant::now();
                    trace!(conn_id = self.id.slot, bytes = n, "Read from socket");
                    frames += self.extract_frames(config)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(frames),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnError::Io(e)),
            }
        }
    }

    /// Pull complete frames out of the read buffer until it runs dry or the
    /// pending queue is full, then discard the consumed prefix.
    fn extract_frames(&mut self, config: &Config) -> Result<usize, ConnError> {
        let limit = config.max_read_buffer_size;
        let mut cursor = 0;
        let mut frames = 0;

        while cursor < self.read_buf.len() {
            if self.input_done {
                cursor = self.read_buf.len();
                break;
            }
            if self.pipeline_full(config) {
                self.input_paused = true;
                break;
            }

            match parse_frame(&self.read_buf[cursor..], limit) {
                FrameResult::Incomplete => break,
                FrameResult::Complete { request, consumed } => {
                    cursor += consumed;
                    self.input_done = request.wants_close();
                    trace!(
                        conn_id = self.id.slot,
                        method = %request.method,
                        path = %request.path,
                        "Framed request"
                    );
                    self.pending.push_back(Pending::Request(request));
                    frames += 1;
                }
                FrameResult::Malformed { error, consumed } => {
                    cursor += consumed;
                    debug!(conn_id = self.id.slot, error = %error, "Malformed request");
                    let response = Response::error(
                        StatusCode::BadRequest,
                        &format!("Invalid HTTP request: {error}"),
                    );
                    self.pending.push_back(Pending::Immediate(response));
                    frames += 1;
                }
                FrameResult::TooLarge { required } => {
                    return Err(ConnError::FrameTooLarge { required, limit });
                }
            }
        }

        self.read_buf.advance(cursor);
        Ok(frames)
    }

    fn pipeline_full(&self, config: &Config) -> bool {
        self.pending.len() >= config.max_pipeline_depth
    }

    /// Continue framing and reading after input was paused on a full
    /// pending queue.
    ///
    /// Readiness is edge-triggered, so the socket is read again even without
    /// a new event. Returns the number of frames queued; zero when input was
    /// not paused or the queue is still full.
    pub fn resume_input(
        &mut self,
        config: &Config,
        metrics: &Metrics,
    ) -> Result<usize, ConnError> {
        if !self.input_paused || self.pipeline_full(config) {
            return Ok(0);
        }
        self.input_paused = false;
        let mut frames = self.extract_frames(config)?;
        if !self.input_paused {
            frames += self.read_step(config, metrics)?;
        }
        Ok(frames)
    }

    /// Next request to hand to the worker pool, if none is in flight.
    ///
    /// Immediate responses queued ahead of it are moved to the write buffer
    /// on the way, preserving arrival order.
    pub fn next_request(&mut self, config: &Config) -> Result<Option<Request>, ConnError> {
        while !self.in_flight {
            match self.pending.pop_front() {
                None => return Ok(None),
                Some(Pending::Immediate(response)) => {
                    self.queue_response(&response.encode(), config)?;
                }
                Some(Pending::Request(request)) => {
                    self.in_flight = true;
                    return Ok(Some(request));
                }
            }
        }
        Ok(None)
    }

    /// The in-flight request has been answered (or abandoned).
    pub fn finish_request(&mut self) {
        self.in_flight = false;
    }

    /// Append encoded response bytes to the write buffer.
    pub fn queue_response(&mut self, bytes: &[u8], config: &Config) -> Result<(), ConnError> {
        if self.write_buf.len() + bytes.len() > config.max_write_buffer_size {
            return Err(ConnError::WriteBufferFull {
                limit: config.max_write_buffer_size,
            });
        }
        self.write_buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Hang up once everything queued so far is written.
    pub fn close_after_flush(&mut self) {
        self.close_after_flush = true;
        self.pending.clear();
    }

    /// Write until the buffer is empty or the socket would block.
    pub fn flush(&mut self, metrics: &Metrics) -> Result<(), ConnError> {
        while !self.write_buf.is_empty() {
            let Some(stream) = self.stream.as_mut() else {
                return Err(ConnError::NotOpen);
            };
            match stream.write(&self.write_buf) {
                Ok(0) => return Err(ConnError::WriteZero),
                Ok(n) => {
                    self.write_buf.advance(n);
                    metrics.bytes_out(n);
                    self.last_activity = Instant::now();
                    trace!(
                        conn_id = self.id.slot,
                        bytes = n,
                        remaining = self.write_buf.len(),
                        "Wrote to socket"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnError::Io(e)),
            }
        }
        Ok(())
    }

    /// Ask for write readiness only while output is pending.
    pub fn update_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let wanted = if self.write_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted == self.interest {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            registry.reregister(stream, self.id.token(), wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    /// Shut the socket down in both directions, deregister and release the
    /// descriptor.
    ///
    /// Returns `false` if the connection was already closed. Registration
    /// failures are logged only: the kernel may already have dropped the
    /// descriptor after a hangup.
    pub fn close(&mut self, registry: &Registry) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        if let Some(mut stream) = self.stream.take() {
            if self.state == ConnState::Active {
                if let Err(e) = registry.deregister(&mut stream) {
                    debug!(conn_id = self.id.slot, error = %e, "Deregister failed");
                }
            }
            let _ = stream.shutdown(Shutdown::Write);
            let _ = stream.shutdown(Shutdown::Read);
        }
        self.state = ConnState::Closed;
        self.pending.clear();
        self.write_buf.clear();
        true
    }

    /// Non-destructive check for an orderly peer shutdown that has not
    /// surfaced as a readiness event yet.
    pub fn peer_has_closed(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return true;
        };
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => true,
            Ok(_) => false,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                false
            }
            Err(_) => true,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    #[cfg(test)]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn buffered_input(&self) -> usize {
        self.read_buf.len()
    }

    #[cfg(test)]
    pub fn buffered_output(&self) -> usize {
        self.write_buf.len()
    }

    /// Everything owed to the client is written and it asked to hang up.
    pub fn should_close(&self) -> bool {
        self.close_after_flush && !self.in_flight && self.write_buf.is_empty()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&mut self, at: Instant) {
        self.last_activity = at;
    }
}

/// Registry of connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. Owned and mutated
/// by the reactor thread only.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(4096)),
            max_connections,
        }
    }

    /// Slot the next insert will occupy.
    pub fn vacant_slot(&self) -> usize {
        self.connections.vacant_key()
    }

    /// Insert a connection into the registry.
    ///
    /// Returns `Err` with the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.is_full() {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    /// Get an immutable reference to a connection.
    pub fn get(&self, slot: usize) -> Option<&Connection> {
        self.connections.get(slot)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Connection> {
        self.connections.get_mut(slot)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, slot: usize) -> Option<Connection> {
        self.connections.try_remove(slot)
    }

    /// Check if a connection exists.
    #[cfg(test)]
    pub fn contains(&self, slot: usize) -> bool {
        self.connections.contains(slot)
    }

    /// Number of occupied slots, including closed connections still
    /// waiting for an in-flight task.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }

    /// Slots of every connection that is still registered.
    pub fn active_slots(&self) -> Vec<usize> {
        self.connections
            .iter()
            .filter(|(_, c)| c.state() == ConnState::Active)
            .map(|(slot, _)| slot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_util::socket_pair;
    use mio::{Events, Poll};
    use std::io::{Read as _, Write as _};

    fn id(slot: usize) -> ConnId {
        ConnId {
            slot,
            generation: 1,
        }
    }

    fn active(poll: &Poll) -> (Connection, std::net::TcpStream) {
        let (server, client) = socket_pair();
        let mut conn = Connection::new();
        conn.reset(server, "127.0.0.1:1".to_string(), id(0));
        conn.register(poll.registry()).unwrap();
        (conn, client)
    }

    /// Poll until the connection's socket is readable, then run a read step.
    fn read_when_ready(
        poll: &mut Poll,
        conn: &mut Connection,
        config: &Config,
    ) -> Result<usize, ConnError> {
        let mut events = Events::with_capacity(8);
        let metrics = Metrics::new();
        let mut total = 0;
        for _ in 0..50 {
            poll.poll(&mut events, Some(Duration::from_millis(100))).unwrap();
            if !events.is_empty() {
                total += conn.read_step(config, &metrics)?;
                if total > 0 {
                    break;
                }
            }
        }
        Ok(total)
    }

    #[test]
    fn test_connection_state_transitions() {
        let poll = Poll::new().unwrap();
        let (server, _client) = socket_pair();
        let mut conn = Connection::new();
        assert_eq!(conn.state(), ConnState::New);

        conn.reset(server, "peer".to_string(), id(0));
        conn.register(poll.registry()).unwrap();
        assert_eq!(conn.state(), ConnState::Active);

        assert!(conn.close(poll.registry()));
        assert_eq!(conn.state(), ConnState::Closed);
        // Second close is a no-op
        assert!(!conn.close(poll.registry()));

        conn.recycle();
        assert_eq!(conn.state(), ConnState::New);
    }

    #[test]
    fn test_pipelined_frames_in_one_read() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config::default();

        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c HTTP/1.1\r\n\r\n")
            .unwrap();
        let frames = read_when_ready(&mut poll, &mut conn, &config).unwrap();
        assert_eq!(frames, 3);
        assert_eq!(conn.buffered_input(), 0);

        let first = conn.next_request(&config).unwrap().unwrap();
        assert_eq!(first.path, "/a");
        // One in flight: nothing else is released
        assert!(conn.next_request(&config).unwrap().is_none());

        conn.finish_request();
        assert_eq!(conn.next_request(&config).unwrap().unwrap().path, "/b");
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config::default();

        client
            .write_all(b"POST /process HTTP/1.1\r\nContent-Length: 10\r\n\r\n01234")
            .unwrap();
        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(Duration::from_secs(2))).unwrap();
        let frames = conn.read_step(&config, &Metrics::new()).unwrap();
        assert_eq!(frames, 0);
        assert!(conn.buffered_input() > 0);

        client.write_all(b"56789").unwrap();
        let frames = read_when_ready(&mut poll, &mut conn, &config).unwrap();
        assert_eq!(frames, 1);
        let req = conn.next_request(&config).unwrap().unwrap();
        assert_eq!(req.body, b"0123456789");
        assert_eq!(conn.buffered_input(), 0);
    }

    #[test]
    fn test_malformed_frame_keeps_order() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config::default();

        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nBROKEN\r\n\r\nGET /b HTTP/1.1\r\n\r\n")
            .unwrap();
        assert_eq!(read_when_ready(&mut poll, &mut conn, &config).unwrap(), 3);

        assert_eq!(conn.next_request(&config).unwrap().unwrap().path, "/a");
        assert_eq!(conn.buffered_output(), 0);

        conn.finish_request();
        // The error response is written out before /b is released
        assert_eq!(conn.next_request(&config).unwrap().unwrap().path, "/b");
        assert!(conn.buffered_output() > 0);
    }

    #[test]
    fn test_oversized_declaration_fails() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config {
            max_read_buffer_size: 1024,
            ..Config::default()
        };

        client
            .write_all(b"POST /process HTTP/1.1\r\nContent-Length: 999999\r\n\r\nabc")
            .unwrap();
        let err = read_when_ready(&mut poll, &mut conn, &config).unwrap_err();
        assert!(matches!(err, ConnError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_unterminated_header_over_limit_fails() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config {
            max_read_buffer_size: 1024,
            ..Config::default()
        };

        let mut flood = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        flood.resize(4096, b'a');
        client.write_all(&flood).unwrap();

        let err = read_when_ready(&mut poll, &mut conn, &config).unwrap_err();
        assert!(matches!(err, ConnError::FrameTooLarge { limit: 1024, .. }));
    }

    #[test]
    fn test_full_pipeline_pauses_input() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config {
            max_pipeline_depth: 2,
            ..Config::default()
        };
        let metrics = Metrics::new();

        let batch: String = (0..10).map(|i| format!("GET /{i} HTTP/1.1\r\n\r\n")).collect();
        client.write_all(batch.as_bytes()).unwrap();

        // A full queue holds input back instead of failing the connection
        let frames = read_when_ready(&mut poll, &mut conn, &config).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(conn.pending_len(), 2);

        let mut paths = Vec::new();
        let mut events = Events::with_capacity(8);
        for _ in 0..50 {
            loop {
                while let Some(request) = conn.next_request(&config).unwrap() {
                    paths.push(request.path);
                    conn.finish_request();
                }
                assert!(conn.pending_len() <= 2);
                if conn.resume_input(&config, &metrics).unwrap() == 0 {
                    break;
                }
            }
            if paths.len() == 10 {
                break;
            }
            poll.poll(&mut events, Some(Duration::from_millis(100))).unwrap();
            conn.read_step(&config, &metrics).unwrap();
        }

        let expected: Vec<String> = (0..10).map(|i| format!("/{i}")).collect();
        assert_eq!(paths, expected);
        assert_eq!(conn.buffered_input(), 0);
    }

    #[test]
    fn test_peer_close_reported() {
        let mut poll = Poll::new().unwrap();
        let (mut conn, client) = active(&poll);
        let config = Config::default();
        drop(client);

        let err = read_when_ready(&mut poll, &mut conn, &config).unwrap_err();
        assert!(matches!(err, ConnError::PeerClosed | ConnError::Io(_)));
        assert!(conn.peer_has_closed());
    }

    #[test]
    fn test_write_interest_toggles() {
        let poll = Poll::new().unwrap();
        let (mut conn, mut client) = active(&poll);
        let config = Config::default();
        let metrics = Metrics::new();

        conn.queue_response(b"hello", &config).unwrap();
        conn.flush(&metrics).unwrap();
        conn.update_interest(poll.registry()).unwrap();
        assert_eq!(conn.interest(), Interest::READABLE);
        assert_eq!(metrics.snapshot().bytes_sent, 5);

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        // Fill the socket until it pushes back
        let chunk = vec![b'x'; 256 * 1024];
        let big = Config {
            max_write_buffer_size: 64 * 1024 * 1024,
            ..Config::default()
        };
        for _ in 0..64 {
            conn.queue_response(&chunk, &big).unwrap();
            conn.flush(&metrics).unwrap();
            if conn.buffered_output() > 0 {
                break;
            }
        }
        assert!(conn.buffered_output() > 0);
        conn.update_interest(poll.registry()).unwrap();
        assert_eq!(conn.interest(), Interest::READABLE | Interest::WRITABLE);
    }

    #[test]
    fn test_write_buffer_limit() {
        let poll = Poll::new().unwrap();
        let (mut conn, _client) = active(&poll);
        let config = Config {
            max_write_buffer_size: 8,
            ..Config::default()
        };
        assert!(conn.queue_response(b"12345678", &config).is_ok());
        assert!(matches!(
            conn.queue_response(b"9", &config),
            Err(ConnError::WriteBufferFull { limit: 8 })
        ));
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let slot = registry.vacant_slot();
        let id1 = registry.insert(Connection::new()).ok().unwrap();
        assert_eq!(slot, id1);
        let id2 = registry.insert(Connection::new()).ok().unwrap();

        // At capacity
        assert!(registry.insert(Connection::new()).is_err());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(id2));

        registry.remove(id1);
        assert!(!registry.contains(id1));
        assert!(registry.remove(id1).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.active_slots().is_empty());
    }
}
