use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// A private SQLite database that disappears with the tracer
    InMemory,
}

/// Who performs the store writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriterMode {
    /// A dedicated thread owns the store. Allocation calls only push the
    /// event onto a queue and return.
    #[default]
    Background,
    /// The calling thread writes the event itself while holding the store
    /// lock. Every call is durable by the time it returns.
    Inline,
}

#[derive(Clone, Debug)]
pub struct TracerConfig {
    location: StoreLocation,
    writer: WriterMode,
    synchronous: bool,
    batch_limit: usize,
}

impl TracerConfig {
    /// Upper bound on the events the background writer commits per
    /// transaction
    pub const DEFAULT_BATCH_LIMIT: usize = 512;

    /// Trace into the store file at `path`, creating it if needed
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self::at(StoreLocation::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::at(StoreLocation::InMemory)
    }

    fn at(location: StoreLocation) -> Self {
        Self {
            location,
            writer: WriterMode::default(),
            synchronous: false,
            batch_limit: Self::DEFAULT_BATCH_LIMIT,
        }
    }

    #[must_use]
    pub fn writer(mut self, writer: WriterMode) -> Self {
        self.writer = writer;
        self
    }

    /// `true` runs the store with `PRAGMA synchronous = FULL`, `false` with
    /// `OFF`. Off by default: tracing every allocation with a disk sync per
    /// commit is too slow for most hosts.
    #[must_use]
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    #[must_use]
    pub fn batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            StoreLocation::File(path) => Some(path),
            StoreLocation::InMemory => None,
        }
    }

    pub fn writer_mode(&self) -> WriterMode {
        self.writer
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn max_batch(&self) -> usize {
        self.batch_limit
    }
}
