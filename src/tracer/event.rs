use std::sync::Arc;

use log::{debug, trace};

use crate::{
    alloc::{Address, CallSite},
    error::TraceError,
    store::{AllocationId, SessionId, TraceStore},
    util::hint::cold,
};

use super::stats::TraceStats;

/// One wrapped heap call, after the real heap has already done its part.
/// Owned so it can cross to the writer thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TraceEvent {
    Allocation {
        address: Address,
        size: usize,
        site: CallSite,
    },
    Deallocation {
        address: Address,
        site: CallSite,
    },
    /// A `realloc()` that handed back a block: the old block ends and the new
    /// one starts, in that order
    Reallocation {
        old: Address,
        new: Address,
        size: usize,
        site: CallSite,
    },
}

/// The store plus the session all events go to
#[derive(Debug)]
pub(crate) struct EventLog {
    store: TraceStore,
    session: SessionId,
    stats: Arc<TraceStats>,
}

impl EventLog {
    pub(crate) fn new(store: TraceStore, session: SessionId, stats: Arc<TraceStats>) -> Self {
        Self {
            store,
            session,
            stats,
        }
    }

    /// Write `events` in one transaction. Failures are counted, never
    /// returned.
    pub(crate) fn apply_batch(&mut self, events: &[TraceEvent]) {
        if events.is_empty() {
            return;
        }
        let session = self.session;
        let stats = &*self.stats;
        let outcome = self.store.in_transaction(|store| {
            events
                .iter()
                .filter(|event| apply(store, session, stats, event))
                .count()
        });
        match outcome {
            Ok(recorded) => stats.recorded(recorded as u64),
            Err(e) => stats.record_failed(events.len() as u64, &e),
        }
    }

    /// End the session and give the store back
    pub(crate) fn close(mut self) -> Result<TraceStore, TraceError> {
        self.store.close_session(self.session)?;
        Ok(self.store)
    }
}

/// `true` if the event was written
fn apply(store: &mut TraceStore, session: SessionId, stats: &TraceStats, event: &TraceEvent) -> bool {
    trace!("applying {event:?}");
    let result = match event {
        TraceEvent::Allocation {
            address,
            size,
            site,
        } => store
            .record_allocation(session, *address, *size, false, site)
            .map(drop),
        TraceEvent::Deallocation { address, site } => {
            let allocation = resolve(store, stats, *address);
            store
                .record_deallocation(session, *address, allocation, false, site)
                .map(drop)
        }
        TraceEvent::Reallocation {
            old,
            new,
            size,
            site,
        } => {
            let allocation = resolve(store, stats, *old);
            store.atomically(|store| {
                store.record_deallocation(session, *old, allocation, true, site)?;
                store.record_allocation(session, *new, *size, true, site)?;
                Ok(())
            })
        }
    };
    match result {
        Ok(()) => true,
        Err(e) => cold(|| {
            stats.record_failed(1, &e);
            false
        }),
    }
}

/// A failed lookup still gets its deallocation row, just without the link
fn resolve(store: &TraceStore, stats: &TraceStats, address: Address) -> Option<AllocationId> {
    match store.resolve(address) {
        Ok(Some(id)) => Some(id),
        Ok(None) => {
            debug!("free of {address}, which was never seen allocated");
            stats.unresolved();
            None
        }
        Err(e) => cold(|| {
            stats.resolve_failed(&e);
            None
        }),
    }
}
