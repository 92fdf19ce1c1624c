//! Operation counters for a graph manager.
//!
//! Lock-free `AtomicU64` counters, one set per manager and shared by its
//! clones. `snapshot()` copies them into a plain serialisable struct.
//!
//! The reciprocal counters make the consistency window observable:
//! `reciprocal_dispatched - reciprocal_settled - reciprocal_failed` is the
//! number of mirror writes still in flight.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    graphs_created: AtomicU64,
    graphs_created_implicitly: AtomicU64,
    rows_written: AtomicU64,
    reciprocal_dispatched: AtomicU64,
    reciprocal_settled: AtomicU64,
    reciprocal_failed: AtomicU64,
    splits: AtomicU64,
    rows_moved: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub graphs_created: u64,
    pub graphs_created_implicitly: u64,
    pub rows_written: u64,
    pub reciprocal_dispatched: u64,
    pub reciprocal_settled: u64,
    pub reciprocal_failed: u64,
    pub splits: u64,
    pub rows_moved: u64,
}

impl MetricsSnapshot {
    /// Reciprocal writes dispatched but not yet finished.
    pub fn reciprocal_in_flight(&self) -> u64 {
        self.reciprocal_dispatched
            .saturating_sub(self.reciprocal_settled + self.reciprocal_failed)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_graph_created(&self, implicit: bool) {
        if implicit {
            self.graphs_created_implicitly.fetch_add(1, Ordering::Relaxed);
        } else {
            self.graphs_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_row_written(&self) {
        self.rows_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reciprocal_dispatched(&self) {
        self.reciprocal_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reciprocal_finished(&self, ok: bool) {
        if ok {
            self.reciprocal_settled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reciprocal_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_split(&self, rows_moved: u64) {
        self.splits.fetch_add(1, Ordering::Relaxed);
        self.rows_moved.fetch_add(rows_moved, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            graphs_created: self.graphs_created.load(Ordering::Relaxed),
            graphs_created_implicitly: self.graphs_created_implicitly.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            reciprocal_dispatched: self.reciprocal_dispatched.load(Ordering::Relaxed),
            reciprocal_settled: self.reciprocal_settled.load(Ordering::Relaxed),
            reciprocal_failed: self.reciprocal_failed.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            rows_moved: self.rows_moved.load(Ordering::Relaxed),
        }
    }
}
