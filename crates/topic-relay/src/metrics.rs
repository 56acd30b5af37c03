// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay metrics.
//!
//! Counters are written by the event loop and may be read from any thread
//! through a [`RelayHandle`](crate::RelayHandle).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for one relay instance.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Datagrams read from the ingest socket
    datagrams_received: AtomicU64,

    /// Datagrams dropped (malformed, unknown kind, unframeable)
    datagrams_dropped: AtomicU64,

    /// Frames queued to consumers
    messages_delivered: AtomicU64,

    /// Consumers dropped because delivery failed
    delivery_failures: AtomicU64,

    /// Successful handshakes
    consumers_accepted: AtomicU64,

    /// Handshakes rejected (duplicate or invalid id)
    consumers_rejected: AtomicU64,

    /// Consumers currently registered
    consumers_active: AtomicUsize,

    /// Subscribe/unsubscribe commands applied
    commands_applied: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_dropped: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
    pub consumers_accepted: u64,
    pub consumers_rejected: u64,
    pub consumers_active: usize,
    pub commands_applied: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: usize) {
        self.messages_delivered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.consumers_accepted.fetch_add(1, Ordering::Relaxed);
        self.consumers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.consumers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnected(&self) {
        self.consumers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            consumers_accepted: self.consumers_accepted.load(Ordering::Relaxed),
            consumers_rejected: self.consumers_rejected.load(Ordering::Relaxed),
            consumers_active: self.consumers_active.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_lifecycle_counters() {
        let metrics = RelayMetrics::new();
        metrics.record_accepted();
        metrics.record_accepted();
        metrics.record_rejected();
        metrics.record_disconnected();

        let snap = metrics.snapshot();
        assert_eq!(snap.consumers_accepted, 2);
        assert_eq!(snap.consumers_rejected, 1);
        assert_eq!(snap.consumers_active, 1);
    }

    #[test]
    fn test_delivery_counters() {
        let metrics = RelayMetrics::new();
        metrics.record_datagram();
        metrics.record_delivered(3);
        metrics.record_datagram();
        metrics.record_dropped();

        let snap = metrics.snapshot();
        assert_eq!(snap.datagrams_received, 2);
        assert_eq!(snap.datagrams_dropped, 1);
        assert_eq!(snap.messages_delivered, 3);
    }
}
