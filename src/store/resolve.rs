//! Matching a freed address back to the allocation it ends.
//!
//! Addresses are reused over the life of a program, so the match is by
//! recency: the allocation with that address and the latest timestamp wins.
//! The search is global (every session in the store) and an allocation is not
//! "used up" once a deallocation points at it. A double free therefore links
//! to the same allocation twice rather than to nothing.

use hashbrown::HashMap;
use rusqlite::{params, OptionalExtension};

use crate::{alloc::Address, error::TraceError};

use super::{AllocationId, TraceStore};

const LATEST_ALLOCATION: &str = "SELECT id FROM allocation
    WHERE address = ?1
    ORDER BY date DESC, id DESC
    LIMIT 1";

/// The newest allocation recorded through one store handle, per address
/// that is still live.
///
/// Rows written through this handle are always newer than anything that was
/// in the store before it (the clock is seeded past them), so a hit here is
/// the global answer. Misses go to the `allocation_address_date` index.
#[derive(Debug, Default)]
pub(crate) struct AddressIndex {
    latest: HashMap<Address, AllocationId>,
}

impl AddressIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, address: Address, id: AllocationId) {
        self.latest.insert(address, id);
    }

    /// The block at `address` is gone. A later free of it (a double free)
    /// still finds the same row through the store.
    pub(crate) fn remove(&mut self, address: Address) {
        self.latest.remove(&address);
    }

    pub(crate) fn latest(&self, address: Address) -> Option<AllocationId> {
        self.latest.get(&address).copied()
    }

    pub(crate) fn clear(&mut self) {
        self.latest.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.latest.len()
    }
}

impl TraceStore {
    /// Find the allocation that a free of `address` ends. `None` means the
    /// tracer never saw `address` allocated, which is not an error.
    pub fn resolve(&self, address: Address) -> Result<Option<AllocationId>, TraceError> {
        match self.index.latest(address) {
            Some(id) => Ok(Some(id)),
            None => self.resolve_in_store(address),
        }
    }

    /// [`TraceStore::resolve`] without the in-memory index
    pub(crate) fn resolve_in_store(
        &self,
        address: Address,
    ) -> Result<Option<AllocationId>, TraceError> {
        self.conn
            .prepare_cached(LATEST_ALLOCATION)
            .and_then(|mut stmt| {
                stmt.query_row(params![address], |row| row.get(0))
                    .optional()
            })
            .map_err(|e| TraceError::resolve(address, e))
    }
}
