use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::{
    alloc::Address,
    store::SessionId,
};

/// Why [`crate::tracer::Tracer::init`] could not start tracing. Each variant
/// except `WriterSpawn` has its own C status code; see [`crate::externc`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitError {
    #[error("could not open trace store at {path}: {source}")]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("could not create trace schema: {0}")]
    SchemaCreation(#[source] SchemaError),

    #[error("could not start trace session: {0}")]
    SessionStart(#[source] rusqlite::Error),

    #[error("could not spawn trace writer thread: {0}")]
    WriterSpawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchemaError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("store is not empty but has no {missing:?} table(s)")]
    Incompatible { missing: Vec<&'static str> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Allocation,
    Deallocation,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation => f.write_str("allocation"),
            Self::Deallocation => f.write_str("deallocation"),
        }
    }
}

/// A failure to log one event. These never reach the caller of an allocation
/// function: the tracer counts them and reports them through `log`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TraceError {
    #[error("failed to write {kind} record for {address}: {source}")]
    RecordWrite {
        kind: EventKind,
        address: Address,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to resolve the allocation freed at {address}: {source}")]
    Resolve {
        address: Address,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to close session {session}: {source}")]
    SessionClose {
        session: SessionId,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to commit trace batch: {0}")]
    Commit(#[source] rusqlite::Error),

    #[error("trace writer is no longer running")]
    WriterGone,
}

impl TraceError {
    #[must_use]
    pub fn record(kind: EventKind, address: Address, source: rusqlite::Error) -> Self {
        Self::RecordWrite {
            kind,
            address,
            source,
        }
    }

    #[must_use]
    pub fn resolve(address: Address, source: rusqlite::Error) -> Self {
        Self::Resolve { address, source }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DumpError {
    #[error("I/O error on session dump: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed session dump: {0}")]
    Json(#[from] serde_json::Error),
}
