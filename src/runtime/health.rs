//! Periodic connection health sweep.
//!
//! Runs on the reactor thread between poll iterations. It only reports
//! connections to close; the reactor closes them through its normal path.

use crate::runtime::connection::{ConnState, ConnectionRegistry};
use std::fmt;
use std::time::{Duration, Instant};

/// Why the sweep flagged a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReason {
    IdleTimeout,
    PeerClosed,
}

impl fmt::Display for SweepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepReason::IdleTimeout => write!(f, "idle timeout"),
            SweepReason::PeerClosed => write!(f, "peer closed (health check)"),
        }
    }
}

pub struct HealthMonitor {
    interval: Duration,
    timeout: Duration,
    last_sweep: Instant,
}

impl HealthMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_sweep: Instant::now(),
        }
    }

    /// Whether a sweep interval has elapsed since the last sweep.
    pub fn due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sweep) >= self.interval
    }

    /// Flag active connections idle longer than the timeout or whose peer
    /// has gone away.
    pub fn sweep(
        &mut self,
        registry: &ConnectionRegistry,
        now: Instant,
    ) -> Vec<(usize, SweepReason)> {
        self.last_sweep = now;
        registry
            .iter()
            .filter(|(_, conn)| conn.state() == ConnState::Active)
            .filter_map(|(slot, conn)| {
                if conn.idle_for(now) > self.timeout {
                    Some((slot, SweepReason::IdleTimeout))
                } else if conn.peer_has_closed() {
                    Some((slot, SweepReason::PeerClosed))
                } else {
                    None
                }
            })
            .collect()
    }
}
