//! Statistics for the sync server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live server counters, updated by the dispatcher and liveness monitor
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    connections_evicted: AtomicU64,
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
    updates_applied: AtomicU64,
    messages_delivered: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total connections ever registered
    pub connections_accepted: u64,
    /// Connections closed by the client or host
    pub connections_closed: u64,
    /// Connections terminated by the liveness sweep
    pub connections_evicted: u64,
    /// Valid messages dispatched
    pub messages_received: u64,
    /// Frames dropped as malformed
    pub malformed_messages: u64,
    /// `update` messages written to the store
    pub updates_applied: u64,
    /// Outbound `update` frames queued (replies and fan-out)
    pub messages_delivered: u64,
    /// Time since the server context was created
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Connections currently registered
    pub fn active_connections(&self) -> u64 {
        self.connections_accepted
            .saturating_sub(self.connections_closed + self.connections_evicted)
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_accepted: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            connections_evicted: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
        }
    }

    pub(crate) fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_evicted(&self) {
        self.connections_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed_message(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn update_applied(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn messages_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_evicted: self.connections_evicted.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snapshot = ServerStats::new().snapshot();
        assert_eq!(snapshot.connections_accepted, 0);
        assert_eq!(snapshot.messages_received, 0);
        assert_eq!(snapshot.active_connections(), 0);
    }

    #[test]
    fn test_active_connections() {
        let stats = ServerStats::new();
        stats.connection_accepted();
        stats.connection_accepted();
        stats.connection_accepted();
        stats.connection_closed();
        stats.connection_evicted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_accepted, 3);
        assert_eq!(snapshot.active_connections(), 1);
    }

    #[test]
    fn test_delivered_accumulates() {
        let stats = ServerStats::new();
        stats.messages_delivered(3);
        stats.messages_delivered(2);
        assert_eq!(stats.snapshot().messages_delivered, 5);
    }
}
