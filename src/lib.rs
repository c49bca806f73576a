//! Heap allocation tracing into an SQLite log.
//!
//! A [`Tracer`] wraps the real heap: every `malloc`, `realloc`, `free`,
//! `strdup` and `calloc` made through it still goes straight to the heap, and
//! is then recorded as an `allocation` or `deallocation` row under the current
//! session. Every deallocation is linked to the most recent allocation at the
//! same address, which is what later lets a reader reconstruct the lifetime of
//! each block (leaks, double frees, reallocation chains).
//!
//! ```no_run
//! use smtrace::{call_site, Tracer, TracerConfig};
//!
//! let tracer = Tracer::init(TracerConfig::new("trace.db")).unwrap();
//! let p = tracer.allocate_at(64, call_site!());
//! unsafe { tracer.free_at(p, call_site!()) };
//! let store = tracer.close().unwrap();
//! ```
//!
//! C hosts use the same machinery through [`externc`].

pub mod alloc;
pub mod config;
pub mod error;
pub mod externc;
mod serialize;
pub mod store;
pub mod tracer;
mod util;

pub use alloc::{Address, CallSite, HeapAllocator, LibcHeap};
pub use config::{StoreLocation, TracerConfig, WriterMode};
pub use error::{InitError, SchemaError, TraceError};
pub use store::{SessionDump, TraceStore};
pub use tracer::{TraceCounters, Tracer};
