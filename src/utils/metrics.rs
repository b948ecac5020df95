//! Observability and Metrics
//!
//! Counters for connection, handshake and packet activity.
//!
//! Each [`Server`](crate::Server) owns one collector shared with all of its
//! clients; client-side sessions carry their own. Uses atomic counters so the
//! hot paths never take a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for runtime operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections registered
    pub connections_total: AtomicU64,
    /// Currently registered connections
    pub connections_active: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Failed or rejected handshakes
    pub handshakes_failed: AtomicU64,
    /// TCP packets written to the wire
    pub packets_sent: AtomicU64,
    /// TCP packets dispatched to handlers
    pub packets_received: AtomicU64,
    /// Droppable packets discarded because the queue was full
    pub packets_dropped: AtomicU64,
    /// Queued droppable packets evicted to make room
    pub packets_evicted: AtomicU64,
    /// Datagrams received by the UDP listener
    pub udp_received: AtomicU64,
    /// Datagrams discarded before dispatch
    pub udp_discarded: AtomicU64,
    /// Accept failures and abnormal connection ends
    pub connection_errors: AtomicU64,
    /// Unknown protocols, unknown packets and decode failures
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            packets_evicted: AtomicU64::new(0),
            udp_received: AtomicU64::new(0),
            udp_discarded: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_evicted(&self) {
        self.packets_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn udp_received(&self) {
        self.udp_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn udp_discarded(&self) {
        self.udp_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_evicted: self.packets_evicted.load(Ordering::Relaxed),
            udp_received: self.udp_received.load(Ordering::Relaxed),
            udp_discarded: self.udp_discarded.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            packets_dropped = snapshot.packets_dropped,
            packets_evicted = snapshot.packets_evicted,
            udp_received = snapshot.udp_received,
            udp_discarded = snapshot.udp_discarded,
            connection_errors = snapshot.connection_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Runtime metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_evicted: u64,
    pub udp_received: u64,
    pub udp_discarded: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_gauge_tracks_open_connections() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
    }

    #[test]
    fn packet_counters_are_independent() {
        let metrics = Metrics::default();
        metrics.packet_dropped();
        metrics.packet_evicted();
        metrics.packet_evicted();
        metrics.udp_discarded();

        let snap = metrics.snapshot();
        assert_eq!(snap.packets_dropped, 1);
        assert_eq!(snap.packets_evicted, 2);
        assert_eq!(snap.udp_discarded, 1);
        assert_eq!(snap.packets_sent, 0);
    }
}
