//! Process-wide counters and the Prometheus text exporter.
//!
//! Every operation is a relaxed atomic update so the reactor and worker
//! threads can record without coordinating. Nothing in the server reads
//! these values to make decisions.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (seconds) of the latency histogram buckets; the last
/// bucket is unbounded.
const BUCKET_BOUNDS: [f64; 4] = [0.001, 0.01, 0.1, 1.0];
const BUCKET_LABELS: [&str; 5] = ["0.001", "0.01", "0.1", "1.0", "+Inf"];

#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    requests_successful: AtomicU64,
    requests_failed: AtomicU64,
    connections_total: AtomicU64,
    active_connections: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    last_duration_micros: AtomicU64,
    duration_sum_micros: AtomicU64,
    duration_count: AtomicU64,
    buckets: [AtomicU64; 5],
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub connections_total: u64,
    pub active_connections: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate at zero rather than wrap.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn request_completed(&self, duration: Duration, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }

        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        self.last_duration_micros.store(micros, Ordering::Relaxed);
        self.duration_sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.duration_count.fetch_add(1, Ordering::Relaxed);

        let secs = duration.as_secs_f64();
        let idx = BUCKET_BOUNDS
            .iter()
            .position(|&bound| secs < bound)
            .unwrap_or(BUCKET_BOUNDS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_in(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_out(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_successful: self.requests_successful.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    /// Render all counters in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::with_capacity(2048);

        counter(&mut out, "requests_total", "Total number of HTTP requests", snap.requests_total);
        counter(
            &mut out,
            "requests_successful",
            "Total successful HTTP requests",
            snap.requests_successful,
        );
        counter(&mut out, "requests_failed", "Total failed HTTP requests", snap.requests_failed);
        counter(
            &mut out,
            "connections_total",
            "Total number of connections",
            snap.connections_total,
        );
        gauge(
            &mut out,
            "active_connections",
            "Current active connections",
            snap.active_connections as f64,
        );

        let last = self.last_duration_micros.load(Ordering::Relaxed) as f64 / 1e6;
        gauge(
            &mut out,
            "request_duration_seconds",
            "Last request duration in seconds",
            last,
        );

        let _ = writeln!(
            out,
            "# HELP muxd_request_duration_seconds_histogram Request duration histogram"
        );
        let _ = writeln!(out, "# TYPE muxd_request_duration_seconds_histogram histogram");
        // Buckets are stored individually; Prometheus expects them cumulative.
        let mut cumulative = 0;
        for (bucket, label) in self.buckets.iter().zip(BUCKET_LABELS) {
            cumulative += bucket.load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "muxd_request_duration_seconds_histogram_bucket{{le=\"{label}\"}} {cumulative}"
            );
        }
        let sum = self.duration_sum_micros.load(Ordering::Relaxed) as f64 / 1e6;
        let _ = writeln!(out, "muxd_request_duration_seconds_histogram_sum {sum}");
        let _ = writeln!(
            out,
            "muxd_request_duration_seconds_histogram_count {}\n",
            self.duration_count.load(Ordering::Relaxed)
        );

        counter(
            &mut out,
            "bytes_received_total",
            "Total bytes received",
            snap.bytes_received,
        );
        counter(&mut out, "bytes_sent_total", "Total bytes sent", snap.bytes_sent);

        let _ = writeln!(out, "# HELP muxd_info Server information");
        let _ = writeln!(out, "# TYPE muxd_info gauge");
        let _ = writeln!(out, "muxd_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION"));
        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP muxd_{name} {help}");
    let _ = writeln!(out, "# TYPE muxd_{name} counter");
    let _ = writeln!(out, "muxd_{name} {value}\n");
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP muxd_{name} {help}");
    let _ = writeln!(out, "# TYPE muxd_{name} gauge");
    let _ = writeln!(out, "muxd_{name} {value}\n");
}
