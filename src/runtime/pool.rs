//! Reusable connection objects.
//!
//! Closed connections are returned here instead of being dropped so their
//! buffers can serve the next accepted socket. The free list is LIFO for
//! cache locality and bounded by `max_pool_size`; anything released beyond
//! that is dropped.

use crate::runtime::connection::{ConnState, Connection};
use crate::runtime::token::ConnId;
use mio::net::TcpStream;

pub struct ConnectionPool {
    /// Stack of recycled connections.
    free_list: Vec<Connection>,
    max_size: usize,
    created: u64,
    reused: u64,
}

impl ConnectionPool {
    /// Create a pool that retains at most `max_size` idle connections.
    pub fn new(max_size: usize) -> Self {
        Self {
            free_list: Vec::with_capacity(max_size.min(1024)),
            max_size,
            created: 0,
            reused: 0,
        }
    }

    /// Hand out a connection bound to `stream`.
    ///
    /// The returned object is always freshly reset, whether it was recycled
    /// or newly created.
    pub fn acquire(&mut self, stream: TcpStream, peer: String, id: ConnId) -> Connection {
        let mut conn = match self.free_list.pop() {
            Some(conn) => {
                self.reused += 1;
                conn
            }
            None => {
                self.created += 1;
                Connection::new()
            }
        };
        conn.reset(stream, peer, id);
        conn
    }

    /// Take back a closed connection.
    ///
    /// Must only be called once the connection has no task in flight.
    pub fn release(&mut self, mut conn: Connection) {
        debug_assert_ne!(conn.state(), ConnState::Active, "releasing an active connection");
        debug_assert!(!conn.in_flight(), "releasing a connection with a task in flight");

        if self.free_list.len() >= self.max_size {
            return;
        }
        conn.recycle();
        self.free_list.push(conn);
    }

    /// Idle connections ready for reuse.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// (created, reused) counts since start.
    pub fn stats(&self) -> (u64, u64) {
        (self.created, self.reused)
    }
}
