//! C entry points, declared in `include/smtrace.h`.
//!
//! There is one process-wide tracer here, set up by `smt_init()` and torn
//! down by `smt_cleanup()`. Outside of that window every function still
//! forwards to the C library heap, it just isn't logged.

use std::{
    ffi::{c_char, c_int, c_void, CStr},
    path::PathBuf,
    ptr,
    sync::{PoisonError, RwLock},
};

use libc::size_t;
use log::{error, warn};

use crate::{
    alloc::{CallSite, HeapAllocator, LibcHeap},
    config::TracerConfig,
    error::InitError,
    tracer::Tracer,
};

pub const SMT_OK: c_int = 0;
pub const SMT_ERR_OPEN_DB: c_int = 1;
pub const SMT_ERR_CREATE_TABLES: c_int = 2;
pub const SMT_ERR_SESSION_START: c_int = 3;

static TRACER: RwLock<Option<Tracer>> = RwLock::new(None);

fn status(e: &InitError) -> c_int {
    match e {
        InitError::StoreOpen { .. } => SMT_ERR_OPEN_DB,
        InitError::SchemaCreation(_) => SMT_ERR_CREATE_TABLES,
        InitError::SessionStart(_) | InitError::WriterSpawn(_) => SMT_ERR_SESSION_START,
    }
}

/// File names are raw bytes on unix, as `sqlite3_open()` takes them
#[cfg(unix)]
fn store_path(path: &CStr) -> Option<PathBuf> {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

    Some(PathBuf::from(OsStr::from_bytes(path.to_bytes())))
}

#[cfg(not(unix))]
fn store_path(path: &CStr) -> Option<PathBuf> {
    path.to_str().ok().map(PathBuf::from)
}

fn with_tracer<R, F>(f: F) -> R
where
    F: FnOnce(Option<&Tracer>) -> R,
{
    let tracer = TRACER.read().unwrap_or_else(PoisonError::into_inner);
    f(tracer.as_ref())
}

fn shut_down(tracer: Tracer) {
    if let Err(e) = tracer.close() {
        warn!("{e}");
    }
}

/// Open `trace_file` (creating the tables if it is a new file) and start a
/// session. Calling it again ends the previous session first.
///
/// # Safety
///
/// `trace_file` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_init(trace_file: *const c_char) -> c_int {
    let _ = env_logger::try_init();
    if trace_file.is_null() {
        error!("smt_init() called with a null path");
        return SMT_ERR_OPEN_DB;
    }
    // SAFETY: requirement passed to caller
    let Some(path) = store_path(unsafe { CStr::from_ptr(trace_file) }) else {
        error!("smt_init() path is not valid UTF-8");
        return SMT_ERR_OPEN_DB;
    };

    let mut slot = TRACER.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = slot.take() {
        shut_down(previous);
    }
    match Tracer::init(TracerConfig::new(path)) {
        Ok(tracer) => {
            *slot = Some(tracer);
            SMT_OK
        }
        Err(e) => {
            error!("{e}");
            status(&e)
        }
    }
}

/// End the session and release the store. Does nothing if no session is open.
#[no_mangle]
pub extern "C" fn smt_cleanup() {
    let tracer = TRACER
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(tracer) = tracer {
        shut_down(tracer);
    }
}

#[no_mangle]
pub extern "C" fn smt_malloc(size: size_t) -> *mut c_void {
    // SAFETY: a null file is allowed
    unsafe { smt_malloc_loc(size, ptr::null(), 0) }
}

/// # Safety
///
/// `ptr` is null or a live block from this library or the C heap.
#[no_mangle]
pub unsafe extern "C" fn smt_realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    unsafe { smt_realloc_loc(ptr, size, ptr::null(), 0) }
}

/// # Safety
///
/// `ptr` is null or a live block from this library or the C heap.
#[no_mangle]
pub unsafe extern "C" fn smt_free(ptr: *mut c_void) {
    unsafe { smt_free_loc(ptr, ptr::null(), 0) }
}

/// # Safety
///
/// `source` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_strdup(source: *const c_char) -> *mut c_char {
    unsafe { smt_strdup_loc(source, ptr::null(), 0) }
}

#[no_mangle]
pub extern "C" fn smt_calloc(count: size_t, size: size_t) -> *mut c_void {
    // SAFETY: a null file is allowed
    unsafe { smt_calloc_loc(count, size, ptr::null(), 0) }
}

/// # Safety
///
/// `file` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_malloc_loc(
    size: size_t,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    with_tracer(|tracer| match tracer {
        // SAFETY: requirement passed to caller
        Some(tracer) => tracer.allocate_at(size, unsafe { CallSite::from_c(file, line) }),
        None => LibcHeap.malloc(size),
    })
}

/// # Safety
///
/// - `ptr` is null or a live block from this library or the C heap.
/// - `file` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_realloc_loc(
    ptr: *mut c_void,
    size: size_t,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    with_tracer(|tracer| match tracer {
        // SAFETY: requirements passed to caller
        Some(tracer) => unsafe { tracer.reallocate_at(ptr, size, CallSite::from_c(file, line)) },
        // SAFETY: requirement passed to caller
        None => unsafe { LibcHeap.realloc(ptr, size) },
    })
}

/// # Safety
///
/// - `ptr` is null or a live block from this library or the C heap.
/// - `file` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_free_loc(ptr: *mut c_void, file: *const c_char, line: c_int) {
    with_tracer(|tracer| match tracer {
        // SAFETY: requirements passed to caller
        Some(tracer) => unsafe { tracer.free_at(ptr, CallSite::from_c(file, line)) },
        // SAFETY: requirement passed to caller
        None => unsafe { LibcHeap.free(ptr) },
    });
}

/// Returns null, without allocating, for a null `source`.
///
/// # Safety
///
/// - `source` is null or a NUL-terminated string.
/// - `file` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_strdup_loc(
    source: *const c_char,
    file: *const c_char,
    line: c_int,
) -> *mut c_char {
    if source.is_null() {
        return ptr::null_mut();
    }
    with_tracer(|tracer| match tracer {
        // SAFETY: requirements passed to caller
        Some(tracer) => unsafe {
            tracer.duplicate_string_at(CStr::from_ptr(source), CallSite::from_c(file, line))
        },
        // SAFETY: requirement passed to caller
        None => unsafe { libc::strdup(source) },
    })
}

/// # Safety
///
/// `file` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn smt_calloc_loc(
    count: size_t,
    size: size_t,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    with_tracer(|tracer| match tracer {
        // SAFETY: requirement passed to caller
        Some(tracer) => tracer.zero_allocate_at(count, size, unsafe { CallSite::from_c(file, line) }),
        // SAFETY: `calloc()` has no preconditions
        None => unsafe { libc::calloc(count, size) },
    })
}
