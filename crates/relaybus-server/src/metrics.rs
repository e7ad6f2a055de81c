//! Relay counters.
//!
//! Plain atomics, read through [`RelayStats::snapshot`]. Every delivery the
//! relay gives up on lands in one of these counters so dropped traffic is
//! never silent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counter.
#[derive(Debug, Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self, n: u64) {
        let _ = self.value.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Shared counters for one relay instance.
#[derive(Debug, Default)]
pub struct RelayStats {
    connections_accepted: Counter,
    connections_rejected: Counter,
    connections_closed: Counter,
    messages_received: Counter,
    deliveries: Counter,
    deliveries_dropped: Counter,
    overflow_disconnects: Counter,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Upgrades accepted on the broadcast path.
    pub connections_accepted: u64,
    /// Requests refused because they asked for another path.
    pub connections_rejected: u64,
    /// Connections that left the set, for any reason.
    pub connections_closed: u64,
    /// Frames received from clients.
    pub messages_received: u64,
    /// Frames queued to a recipient.
    pub deliveries: u64,
    /// Frames a recipient never got (closed or overflowing).
    pub deliveries_dropped: u64,
    /// Recipients disconnected because their send buffer filled up.
    pub overflow_disconnects: u64,
}

impl RelayStats {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self) {
        self.connections_accepted.increment(1);
    }

    pub(crate) fn record_rejected(&self) {
        self.connections_rejected.increment(1);
    }

    pub(crate) fn record_closed(&self) {
        self.connections_closed.increment(1);
    }

    pub(crate) fn record_received(&self) {
        self.messages_received.increment(1);
    }

    pub(crate) fn record_fan_out(&self, delivered: u64, dropped: u64, overflowed: u64) {
        self.deliveries.increment(delivered);
        self.deliveries_dropped.increment(dropped);
        self.overflow_disconnects.increment(overflowed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.get(),
            connections_rejected: self.connections_rejected.get(),
            connections_closed: self.connections_closed.get(),
            messages_received: self.messages_received.get(),
            deliveries: self.deliveries.get(),
            deliveries_dropped: self.deliveries_dropped.get(),
            overflow_disconnects: self.overflow_disconnects.get(),
        }
    }
}
