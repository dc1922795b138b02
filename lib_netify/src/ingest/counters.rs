//! # Ingest Counters
//!
//! Lock-free tallies shared by every connection task. Each counter is an
//! `AtomicU64` bumped with `Relaxed` ordering; the values are only read for
//! periodic reporting, so no cross-counter consistency is needed.
//!
//! Persistence failures are swallowed per record by the pipeline. These
//! counters are what makes them visible to operators.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared ingestion counters.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub lines: AtomicU64,
    pub handshakes_accepted: AtomicU64,
    pub handshakes_ignored: AtomicU64,
    pub flows_persisted: AtomicU64,
    pub flows_dropped_unknown_zone: AtomicU64,
    pub flows_dropped_unknown_device: AtomicU64,
    pub stats_persisted: AtomicU64,
    pub ignored_types: AtomicU64,
    pub parse_errors: AtomicU64,
    pub line_overflows: AtomicU64,
    pub flow_failures: AtomicU64,
    pub child_failures: AtomicU64,
    pub stats_failures: AtomicU64,
    pub resolution_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub lines: u64,
    pub handshakes_accepted: u64,
    pub handshakes_ignored: u64,
    pub flows_persisted: u64,
    pub flows_dropped_unknown_zone: u64,
    pub flows_dropped_unknown_device: u64,
    pub stats_persisted: u64,
    pub ignored_types: u64,
    pub parse_errors: u64,
    pub line_overflows: u64,
    pub flow_failures: u64,
    pub child_failures: u64,
    pub stats_failures: u64,
    pub resolution_failures: u64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to `counter`.
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n` to `counter`.
    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            connections_opened: load(&self.connections_opened),
            connections_closed: load(&self.connections_closed),
            lines: load(&self.lines),
            handshakes_accepted: load(&self.handshakes_accepted),
            handshakes_ignored: load(&self.handshakes_ignored),
            flows_persisted: load(&self.flows_persisted),
            flows_dropped_unknown_zone: load(&self.flows_dropped_unknown_zone),
            flows_dropped_unknown_device: load(&self.flows_dropped_unknown_device),
            stats_persisted: load(&self.stats_persisted),
            ignored_types: load(&self.ignored_types),
            parse_errors: load(&self.parse_errors),
            line_overflows: load(&self.line_overflows),
            flow_failures: load(&self.flow_failures),
            child_failures: load(&self.child_failures),
            stats_failures: load(&self.stats_failures),
            resolution_failures: load(&self.resolution_failures),
        }
    }
}

impl CounterSnapshot {
    /// Sum of every persistence and resolution failure counter.
    pub fn failures(&self) -> u64 {
        self.flow_failures + self.child_failures + self.stats_failures + self.resolution_failures
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> u64 {
        self.connections_opened.saturating_sub(self.connections_closed)
    }
}
