use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{alloc::Address, error::DumpError};

use super::{AllocationId, DeallocationId, SessionId, Timestamp, TraceStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub start: Timestamp,
    /// Equal to `start` until the session is closed
    pub end: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub id: AllocationId,
    pub session_id: SessionId,
    pub date: Timestamp,
    pub size: u64,
    pub address: Address,
    /// This is the new block of a `realloc()`
    pub is_reallocation: bool,
    pub file: String,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeallocationRow {
    pub id: DeallocationId,
    pub session_id: SessionId,
    pub date: Timestamp,
    pub address: Address,
    /// `None` if the address was never seen allocated
    pub allocation_id: Option<AllocationId>,
    /// This is the old block of a `realloc()`
    pub is_reallocation: bool,
    pub file: String,
    pub line: u32,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start: row.get(1)?,
            end: row.get(2)?,
        })
    }
}

impl AllocationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            date: row.get(2)?,
            size: row.get(3)?,
            address: row.get(4)?,
            is_reallocation: row.get(5)?,
            file: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            line: row.get::<_, Option<u32>>(7)?.unwrap_or_default(),
        })
    }
}

impl DeallocationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            date: row.get(2)?,
            address: row.get(3)?,
            allocation_id: row.get(4)?,
            is_reallocation: row.get(5)?,
            file: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            line: row.get::<_, Option<u32>>(7)?.unwrap_or_default(),
        })
    }
}

/// Read-only views of the log, in insertion order
impl TraceStore {
    pub fn sessions(&self) -> rusqlite::Result<Vec<SessionRow>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, start_date, end_date FROM session ORDER BY id")?;
        let rows = stmt.query_map([], SessionRow::from_row)?;
        rows.collect()
    }

    pub fn session(&self, id: SessionId) -> rusqlite::Result<Option<SessionRow>> {
        self.conn
            .prepare_cached("SELECT id, start_date, end_date FROM session WHERE id = ?1")?
            .query_row(params![id], SessionRow::from_row)
            .optional()
    }

    pub fn allocations(&self, session: SessionId) -> rusqlite::Result<Vec<AllocationRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, session_id, date, size, address, is_reallocation, file, line
             FROM allocation WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session], AllocationRow::from_row)?;
        rows.collect()
    }

    pub fn deallocations(&self, session: SessionId) -> rusqlite::Result<Vec<DeallocationRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, session_id, date, address, allocation_id, is_reallocation, file, line
             FROM deallocation WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session], DeallocationRow::from_row)?;
        rows.collect()
    }

    pub fn allocation(&self, id: AllocationId) -> rusqlite::Result<Option<AllocationRow>> {
        self.conn
            .prepare_cached(
                "SELECT id, session_id, date, size, address, is_reallocation, file, line
                 FROM allocation WHERE id = ?1",
            )?
            .query_row(params![id], AllocationRow::from_row)
            .optional()
    }

    /// Everything recorded under one session, `None` if there is no such
    /// session.
    pub fn dump_session(&self, id: SessionId) -> rusqlite::Result<Option<SessionDump>> {
        let Some(session) = self.session(id)? else {
            return Ok(None);
        };
        Ok(Some(SessionDump {
            allocations: self.allocations(id)?,
            deallocations: self.deallocations(id)?,
            session,
        }))
    }
}

/// One session's rows, detached from the store. This is the raw material for
/// a leak report, it does not draw any conclusions itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDump {
    pub session: SessionRow,
    pub allocations: Vec<AllocationRow>,
    pub deallocations: Vec<DeallocationRow>,
}

impl SessionDump {
    pub fn write_to_file<P>(&self, path: P) -> Result<(), DumpError>
    where
        P: AsRef<Path>,
    {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn from_file<P>(path: P) -> Result<Self, DumpError>
    where
        P: AsRef<Path>,
    {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
