//! Custom runtime for multiplexed connection handling.
//!
//! One reactor thread drives every socket through mio readiness events;
//! request handling runs on a fixed worker pool.
//!
//! - `event_loop`: the reactor (accept, read, frame, dispatch, write, close)
//! - `connection`: per-connection state machine and slab registry
//! - `pool`: recycled connection objects
//! - `worker`: FIFO worker thread pool
//! - `task`: reactor/worker hand-off types
//! - `health`: idle and dead-peer sweep
//! - `token`: token layout and connection identities
//! - `socket`: listener setup

mod connection;
mod event_loop;
mod health;
mod pool;
pub mod socket;
mod task;
mod token;
mod worker;

pub use event_loop::Reactor;
