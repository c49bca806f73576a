use log::trace;
use rusqlite::params;

use crate::{
    alloc::{Address, CallSite},
    error::{EventKind, TraceError},
};

use super::{AllocationId, DeallocationId, SessionId, TraceStore};

const INSERT_ALLOCATION: &str = "INSERT INTO allocation
    (session_id, date, size, address, is_reallocation, file, line)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const INSERT_DEALLOCATION: &str = "INSERT INTO deallocation
    (session_id, date, address, allocation_id, is_reallocation, file, line)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

impl TraceStore {
    /// Append one `allocation` row stamped with the current time. Later
    /// deallocations of `address` resolve to this row until another
    /// allocation at the same address is recorded.
    pub fn record_allocation(
        &mut self,
        session: SessionId,
        address: Address,
        size: usize,
        is_reallocation: bool,
        site: &CallSite,
    ) -> Result<AllocationId, TraceError> {
        let size = i64::try_from(size).map_err(|e| {
            TraceError::record(
                EventKind::Allocation,
                address,
                rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
            )
        })?;
        let now = self.clock.now();
        let id = self
            .conn
            .prepare_cached(INSERT_ALLOCATION)
            .and_then(|mut stmt| {
                stmt.insert(params![
                    session,
                    now,
                    size,
                    address,
                    is_reallocation,
                    site.file.as_ref(),
                    site.line,
                ])
            })
            .map(AllocationId)
            .map_err(|e| TraceError::record(EventKind::Allocation, address, e))?;
        self.index.insert(address, id);
        trace!("allocation {id}: {size} bytes at {address} ({site})");
        Ok(id)
    }

    /// Append one `deallocation` row stamped with the current time.
    /// `allocation` is whatever [`TraceStore::resolve`] found; `None` is
    /// stored as a NULL link.
    pub fn record_deallocation(
        &mut self,
        session: SessionId,
        address: Address,
        allocation: Option<AllocationId>,
        is_reallocation: bool,
        site: &CallSite,
    ) -> Result<DeallocationId, TraceError> {
        let now = self.clock.now();
        let id = self
            .conn
            .prepare_cached(INSERT_DEALLOCATION)
            .and_then(|mut stmt| {
                stmt.insert(params![
                    session,
                    now,
                    address,
                    allocation,
                    is_reallocation,
                    site.file.as_ref(),
                    site.line,
                ])
            })
            .map(DeallocationId)
            .map_err(|e| TraceError::record(EventKind::Deallocation, address, e))?;
        self.index.remove(address);
        trace!("deallocation {id}: {address} -> {allocation:?} ({site})");
        Ok(id)
    }
}
