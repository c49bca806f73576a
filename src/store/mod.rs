//! The durable side of the tracer: one SQLite connection holding the
//! `session`, `allocation` and `deallocation` tables.
//!
//! A [`TraceStore`] is not shared. The tracer either keeps it behind a mutex
//! or hands it to a writer thread, so every method here takes `&mut self` or
//! assumes the caller already serialized access.

mod clock;
mod query;
mod record;
mod resolve;
mod schema;
mod session;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::warn;
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, ToSql,
};
use serde::{Deserialize, Serialize};

use crate::{
    alloc::Address,
    error::{InitError, TraceError},
};

pub use clock::Timestamp;
pub use query::{AllocationRow, DeallocationRow, SessionDump, SessionRow};
pub use schema::SchemaState;

use clock::Clock;
use resolve::AddressIndex;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

row_id!(
    /// Surrogate key of a `session` row
    SessionId
);
row_id!(
    /// Surrogate key of an `allocation` row
    AllocationId
);
row_id!(
    /// Surrogate key of a `deallocation` row
    DeallocationId
);

impl ToSql for Address {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_sql_value()))
    }
}

impl FromSql for Address {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let value = i64::column_result(value)?;
        Address::from_sql_value(value).ok_or(FromSqlError::OutOfRange(value))
    }
}

pub struct TraceStore {
    conn: Connection,
    path: Option<PathBuf>,
    clock: Clock,
    index: AddressIndex,
}

impl fmt::Debug for TraceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceStore")
            .field("path", &self.path)
            .field("indexed_addresses", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl TraceStore {
    /// Open (or create) the store file at `path`. The schema is not touched,
    /// see [`TraceStore::ensure_schema`].
    pub fn open<P>(path: P) -> Result<Self, InitError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        match Connection::open(&path) {
            Ok(conn) => Ok(Self::with_connection(conn, Some(path))),
            Err(source) => Err(InitError::StoreOpen { path, source }),
        }
    }

    /// A private, non-durable store. Mostly useful for tests.
    pub fn open_in_memory() -> Result<Self, InitError> {
        Connection::open_in_memory()
            .map(|conn| Self::with_connection(conn, None))
            .map_err(|source| InitError::StoreOpen {
                path: PathBuf::from(":memory:"),
                source,
            })
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        Self {
            conn,
            path,
            clock: Clock::new(),
            index: AddressIndex::new(),
        }
    }

    /// `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// With `false`, SQLite no longer waits for the disk on every commit.
    /// Trades crash durability for a much cheaper write path.
    pub fn set_synchronous(&self, synchronous: bool) -> rusqlite::Result<()> {
        let mode = if synchronous { "FULL" } else { "OFF" };
        self.conn.pragma_update(None, "synchronous", mode)
    }

    /// `false` only while `PRAGMA synchronous` is `OFF`
    pub fn is_synchronous(&self) -> rusqlite::Result<bool> {
        self.conn
            .pragma_query_value(None, "synchronous", |row| row.get::<_, i64>(0))
            .map(|level| level != 0)
    }

    /// Run `f` inside one SQLite transaction. Whatever `f` wrote becomes
    /// visible (and durable) together, or not at all.
    ///
    /// `f` reports its own per-event failures through its return value, those
    /// do not roll the transaction back.
    pub(crate) fn in_transaction<R, F>(&mut self, f: F) -> Result<R, TraceError>
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.conn
            .execute_batch("BEGIN")
            .map_err(TraceError::Commit)?;
        let result = f(self);
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback after failed commit also failed: {rollback}");
            }
            // Entries added during `f` may point at rows that no longer exist
            self.index.clear();
            return Err(TraceError::Commit(e));
        }
        Ok(result)
    }

    /// Run `f` under a savepoint: if it fails, none of its writes stay.
    /// Nests inside [`TraceStore::in_transaction`].
    pub(crate) fn atomically<R, F>(&mut self, f: F) -> Result<R, TraceError>
    where
        F: FnOnce(&mut Self) -> Result<R, TraceError>,
    {
        self.conn
            .execute_batch("SAVEPOINT event")
            .map_err(TraceError::Commit)?;
        let result = f(self);
        let end = if result.is_ok() {
            "RELEASE event"
        } else {
            "ROLLBACK TO event; RELEASE event"
        };
        if let Err(e) = self.conn.execute_batch(end) {
            if result.is_ok() {
                return Err(TraceError::Commit(e));
            }
            warn!("could not roll back partial event: {e}");
        }
        result
    }
}
