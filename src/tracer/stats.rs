use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use serde::Serialize;

use crate::error::TraceError;

/// Shared between the façade and whoever writes the events
#[derive(Debug, Default)]
pub(crate) struct TraceStats {
    submitted: AtomicU64,
    recorded: AtomicU64,
    record_failures: AtomicU64,
    resolve_failures: AtomicU64,
    unresolved: AtomicU64,
}

/// A snapshot of a tracer's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TraceCounters {
    /// Events handed to the writer
    pub submitted: u64,
    /// Events that made it into the store
    pub recorded: u64,
    /// Events lost to a failed write or commit
    pub record_failures: u64,
    /// Deallocations written without a link because the lookup failed
    pub resolve_failures: u64,
    /// Deallocations of addresses the store has never seen allocated
    pub unresolved: u64,
}

impl TraceCounters {
    /// Everything submitted so far has been written or given up on
    pub fn is_settled(&self) -> bool {
        self.recorded + self.record_failures == self.submitted
    }
}

impl TraceStats {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recorded(&self, count: u64) {
        self.recorded.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, count: u64, error: &TraceError) {
        self.record_failures.fetch_add(count, Ordering::Relaxed);
        warn!("dropped {count} trace event(s): {error}");
    }

    pub(crate) fn resolve_failed(&self, error: &TraceError) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
        warn!("{error}");
    }

    pub(crate) fn unresolved(&self) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TraceCounters {
        TraceCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            record_failures: self.record_failures.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
        }
    }
}
