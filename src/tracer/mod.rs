//! The allocation façade: `malloc()` and friends, wrapped so that every call
//! leaves a row in the trace store.
//!
//! Each operation calls the real heap first and returns exactly what the heap
//! returned. Logging comes after and can only fail quietly, the failure shows
//! up in [`Tracer::stats`] and in the `log` output, never in the return value.

mod event;
mod stats;
mod writer;

use std::{
    ffi::{c_char, c_void, CStr},
    fmt,
    ptr,
    sync::Arc,
};

use log::{debug, warn};

use crate::{
    alloc::{Address, CallSite, HeapAllocator, LibcHeap},
    config::{StoreLocation, TracerConfig},
    error::{InitError, TraceError},
    store::{SessionId, TraceStore},
    util::hint::cold,
};

pub use stats::TraceCounters;

use event::{EventLog, TraceEvent};
use stats::TraceStats;
use writer::Writer;

/// A tracing session over one store. Events go to the session opened by
/// [`Tracer::init`] until [`Tracer::close`] (or drop) ends it.
pub struct Tracer<H = LibcHeap>
where
    H: HeapAllocator,
{
    heap: H,
    session: SessionId,
    stats: Arc<TraceStats>,
    writer: Option<Writer>,
}

impl Tracer<LibcHeap> {
    /// Open the store, create the schema if the store is empty, and start a
    /// session. Tracing the C library heap.
    pub fn init(config: TracerConfig) -> Result<Self, InitError> {
        Self::with_heap(LibcHeap, config)
    }
}

impl<H> Tracer<H>
where
    H: HeapAllocator,
{
    pub fn with_heap(heap: H, config: TracerConfig) -> Result<Self, InitError> {
        let mut store = match config.location() {
            StoreLocation::File(path) => TraceStore::open(path)?,
            StoreLocation::InMemory => TraceStore::open_in_memory()?,
        };
        if let Err(e) = store.set_synchronous(config.is_synchronous()) {
            warn!("could not set synchronous writes: {e}");
        }
        store.ensure_schema().map_err(InitError::SchemaCreation)?;
        let session = store.open_session().map_err(InitError::SessionStart)?;

        let stats = Arc::new(TraceStats::default());
        let log = EventLog::new(store, session, Arc::clone(&stats));
        let writer = Writer::start(log, &config)?;
        debug!("tracing session {session} ({:?} writer)", config.writer_mode());

        Ok(Self {
            heap,
            session,
            stats,
            writer: Some(writer),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn stats(&self) -> TraceCounters {
        self.stats.snapshot()
    }

    /// Block until every event so far is committed. Only the background
    /// writer ever has anything outstanding.
    pub fn flush(&self) -> Result<(), TraceError> {
        self.writer
            .as_ref()
            .ok_or(TraceError::WriterGone)?
            .flush()
    }

    /// End the session: write everything still queued, set the session's end
    /// date, and hand back the store.
    pub fn close(mut self) -> Result<TraceStore, TraceError> {
        let writer = self.writer.take().ok_or(TraceError::WriterGone)?;
        writer.finish()?.close()
    }

    fn submit(&self, event: TraceEvent) {
        let Some(writer) = &self.writer else {
            return;
        };
        self.stats.submitted();
        if let Err(e) = writer.submit(event) {
            cold(|| self.stats.record_failed(1, &e));
        }
    }

    pub fn allocate(&self, size: usize) -> *mut c_void {
        self.allocate_at(size, CallSite::unknown())
    }

    /// `malloc(size)`. A null result is returned as-is and not logged.
    pub fn allocate_at(&self, size: usize, site: CallSite) -> *mut c_void {
        let ptr = self.heap.malloc(size);
        if let Some(address) = Address::from_ptr(ptr) {
            self.submit(TraceEvent::Allocation {
                address,
                size,
                site,
            });
        }
        ptr
    }

    /// # Safety
    ///
    /// Same as [`Tracer::reallocate_at`]
    pub unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        unsafe { self.reallocate_at(ptr, size, CallSite::unknown()) }
    }

    /// `realloc(ptr, size)`, logged as
    ///
    /// - an allocation if `ptr` is null,
    /// - a plain deallocation of `ptr` if `size` is zero,
    /// - otherwise a deallocation of `ptr` followed by an allocation of the
    ///   returned block, both flagged as a reallocation.
    ///
    /// A null result for a non-zero `size` means `ptr` is still live, so
    /// nothing is logged.
    ///
    /// # Safety
    ///
    /// `ptr` is null or a live block from this tracer's heap.
    pub unsafe fn reallocate_at(&self, ptr: *mut c_void, size: usize, site: CallSite) -> *mut c_void {
        // SAFETY: requirement passed to caller
        let new_ptr = unsafe { self.heap.realloc(ptr, size) };
        let new = Address::from_ptr(new_ptr);
        match Address::from_ptr(ptr) {
            None => {
                if let Some(address) = new {
                    self.submit(TraceEvent::Allocation {
                        address,
                        size,
                        site,
                    });
                }
            }
            Some(address) if size == 0 => {
                self.submit(TraceEvent::Deallocation { address, site });
            }
            Some(old) => {
                if let Some(new) = new {
                    self.submit(TraceEvent::Reallocation {
                        old,
                        new,
                        size,
                        site,
                    });
                }
            }
        }
        new_ptr
    }

    /// # Safety
    ///
    /// Same as [`Tracer::free_at`]
    pub unsafe fn free(&self, ptr: *mut c_void) {
        unsafe { self.free_at(ptr, CallSite::unknown()) }
    }

    /// `free(ptr)`. Freeing null does nothing and logs nothing.
    ///
    /// # Safety
    ///
    /// `ptr` is null or a live block from this tracer's heap.
    pub unsafe fn free_at(&self, ptr: *mut c_void, site: CallSite) {
        // SAFETY: requirement passed to caller
        unsafe { self.heap.free(ptr) };
        if let Some(address) = Address::from_ptr(ptr) {
            self.submit(TraceEvent::Deallocation { address, site });
        }
    }

    pub fn duplicate_string(&self, source: &CStr) -> *mut c_char {
        self.duplicate_string_at(source, CallSite::unknown())
    }

    /// `strdup(source)`: one logged allocation of `strlen(source) + 1` bytes
    pub fn duplicate_string_at(&self, source: &CStr, site: CallSite) -> *mut c_char {
        let bytes = source.to_bytes_with_nul();
        let dst = self.allocate_at(bytes.len(), site).cast::<u8>();
        if !dst.is_null() {
            // SAFETY: the heap contract makes `dst` valid for `bytes.len()`
            // bytes, and a fresh block cannot overlap `source`
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        }
        dst.cast()
    }

    pub fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void {
        self.zero_allocate_at(count, size, CallSite::unknown())
    }

    /// `calloc(count, size)`: one logged allocation of `count * size` zeroed
    /// bytes. An overflowing product returns null without touching the heap.
    pub fn zero_allocate_at(&self, count: usize, size: usize, site: CallSite) -> *mut c_void {
        let Some(total) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        let ptr = self.allocate_at(total, site);
        if !ptr.is_null() {
            // SAFETY: the heap contract makes `ptr` valid for `total` bytes
            unsafe { ptr.cast::<u8>().write_bytes(0, total) };
        }
        ptr
    }
}

impl<H> Drop for Tracer<H>
where
    H: HeapAllocator,
{
    fn drop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        if let Err(e) = writer.finish().and_then(EventLog::close) {
            warn!("trace session {} was not closed cleanly: {e}", self.session);
        }
    }
}

impl<H> fmt::Debug for Tracer<H>
where
    H: HeapAllocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("session", &self.session)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;
    use crate::config::WriterMode;

    fn inline() -> Tracer {
        Tracer::init(TracerConfig::in_memory().writer(WriterMode::Inline)).unwrap()
    }

    #[test]
    fn allocations_are_logged_with_their_call_site() {
        let tracer = inline();
        let session = tracer.session_id();
        let p = tracer.allocate_at(40, CallSite::new("lib.c", 9));
        assert!(!p.is_null());
        // SAFETY: `p` came from this tracer
        unsafe { tracer.free(p) };

        let store = tracer.close().unwrap();
        let allocations = store.allocations(session).unwrap();
        let deallocations = store.deallocations(session).unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].size, 40);
        assert_eq!(allocations[0].address, Address::from_ptr(p).unwrap());
        assert_eq!((allocations[0].file.as_str(), allocations[0].line), ("lib.c", 9));
        assert_eq!(deallocations.len(), 1);
        assert_eq!(deallocations[0].allocation_id, Some(allocations[0].id));
        assert_eq!(deallocations[0].line, 0);
    }

    #[test]
    fn free_null_logs_nothing() {
        let tracer = inline();
        let session = tracer.session_id();
        // SAFETY: null is always fine
        unsafe { tracer.free(ptr::null_mut()) };
        assert_eq!(tracer.stats(), TraceCounters::default());

        let store = tracer.close().unwrap();
        assert!(store.deallocations(session).unwrap().is_empty());
    }

    #[test]
    fn duplicate_string_copies_and_logs_once() {
        let tracer = inline();
        let session = tracer.session_id();
        let source = CString::new("hello").unwrap();
        let copy = tracer.duplicate_string(&source);
        assert!(!copy.is_null());
        // SAFETY: `copy` holds a NUL-terminated string
        assert_eq!(unsafe { CStr::from_ptr(copy) }, source.as_c_str());
        // SAFETY: `copy` came from this tracer
        unsafe { tracer.free(copy.cast()) };

        let store = tracer.close().unwrap();
        let allocations = store.allocations(session).unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].size, 6);
    }

    #[test]
    fn zero_allocate_zeroes_and_logs_once() {
        let tracer = inline();
        let session = tracer.session_id();
        let p = tracer.zero_allocate(4, 8).cast::<u8>();
        assert!(!p.is_null());
        // SAFETY: `p` is valid for 32 bytes
        let bytes = unsafe { std::slice::from_raw_parts(p, 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        // SAFETY: `p` came from this tracer
        unsafe { tracer.free(p.cast()) };

        let store = tracer.close().unwrap();
        let allocations = store.allocations(session).unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].size, 32);
    }

    #[test]
    fn overflowing_zero_allocate_is_null_and_silent() {
        let tracer = inline();
        assert!(tracer.zero_allocate(usize::MAX, 2).is_null());
        assert_eq!(tracer.stats().submitted, 0);
    }

    #[test]
    fn synchronous_writes_follow_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.db");

        let store = Tracer::init(TracerConfig::new(&path)).unwrap().close().unwrap();
        assert!(!store.is_synchronous().unwrap());
        drop(store);

        let config = TracerConfig::new(&path).synchronous(true);
        let store = Tracer::init(config).unwrap().close().unwrap();
        assert!(store.is_synchronous().unwrap());
    }

    #[test]
    fn dropping_the_tracer_closes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.db");
        let tracer = Tracer::init(TracerConfig::new(&path)).unwrap();
        let session = tracer.session_id();
        let p = tracer.allocate(1);
        drop(tracer);
        // SAFETY: `p` came from libc `malloc()`
        unsafe { LibcHeap.free(p) };

        let store = TraceStore::open(&path).unwrap();
        let row = store.session(session).unwrap().unwrap();
        assert!(row.end > row.start);
        assert_eq!(store.allocations(session).unwrap().len(), 1);
    }
}
