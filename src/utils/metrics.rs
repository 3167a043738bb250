//! Observability counters.
//!
//! Thread-safe counters for session traffic. Increments are relaxed
//! atomics; there is no ordering requirement across counters, and snapshots
//! are advisory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for one lifecycle manager (client or server).
#[derive(Debug)]
pub struct SessionMetrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Total packets sent
    pub packets_sent: AtomicU64,
    /// Total packets received and processed
    pub packets_received: AtomicU64,
    /// Start time for uptime calculation
    started_at: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a new connection.
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet handed to the transport.
    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet successfully unpacked.
    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset the traffic counters (server stop).
    pub fn reset(&self) {
        self.packets_sent.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
    }

    /// Get current counter snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Log a status line with the current online count.
    pub fn log_status(&self, online: usize) {
        let snapshot = self.snapshot();
        info!(
            online,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            uptime_seconds = snapshot.uptime_seconds,
            "Session status"
        );
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counters at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let metrics = SessionMetrics::new();
        metrics.packet_sent();
        metrics.packet_sent();
        metrics.packet_received();

        let snap = metrics.snapshot();
        assert_eq!(snap.packets_sent, 2);
        assert_eq!(snap.packets_received, 1);

        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.packets_sent, 0);
        assert_eq!(snap.packets_received, 0);
    }
}
