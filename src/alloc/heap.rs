use std::ffi::c_void;

pub(crate) mod c {
    use libc::{c_void, size_t};

    extern "C" {
        pub fn malloc(size: size_t) -> *mut c_void;
        pub fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void;
        pub fn free(ptr: *mut c_void);
    }
}

/// The real heap that a [`crate::tracer::Tracer`] wraps. The tracer never
/// allocates anything itself, it forwards every call here first and only then
/// logs what happened.
///
/// # Safety
///
/// - A non-null pointer returned from `malloc(size)` or `realloc(_, size)`
///   must be valid for writes of `size` bytes, since the tracer fills
///   `zero_allocate()` and `duplicate_string()` results through it.
/// - A pointer must not be returned again while it is still live. The
///   resolver relies on "same address" meaning "same block or a later reuse".
pub unsafe trait HeapAllocator: Send + Sync {
    /// Same contract as C `malloc()`
    fn malloc(&self, size: usize) -> *mut c_void;

    /// Same contract as C `realloc()`
    ///
    /// # Safety
    ///
    /// `ptr` is null or a live pointer previously returned by this heap.
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// Same contract as C `free()`, so `free(null)` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` is null or a live pointer previously returned by this heap.
    unsafe fn free(&self, ptr: *mut c_void);
}

/// The process heap, as exposed by the C library.
#[derive(Clone, Copy, Debug, Default)]
pub struct LibcHeap;

// SAFETY: libc `malloc()` hands out unique blocks valid for `size` bytes.
unsafe impl HeapAllocator for LibcHeap {
    fn malloc(&self, size: usize) -> *mut c_void {
        // SAFETY: `malloc()` has no preconditions
        unsafe { c::malloc(size) }
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        // SAFETY: identical contract to caller
        unsafe { c::realloc(ptr, size) }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        // SAFETY: identical contract to caller
        unsafe { c::free(ptr) }
    }
}

// SAFETY: forwards to `H`, which upholds the contract itself.
unsafe impl<H> HeapAllocator for &H
where
    H: HeapAllocator,
{
    fn malloc(&self, size: usize) -> *mut c_void {
        (**self).malloc(size)
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        unsafe { (**self).realloc(ptr, size) }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        unsafe { (**self).free(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::*;

    #[test]
    fn libc_heap_round_trips_a_block() {
        let heap = LibcHeap;
        let p = heap.malloc(16);
        assert!(!p.is_null());
        // SAFETY: `p` is valid for 16 bytes
        unsafe {
            p.cast::<u8>().write_bytes(0xab, 16);
            let q = heap.realloc(p, 64);
            assert!(!q.is_null());
            assert_eq!(*q.cast::<u8>().add(15), 0xab);
            heap.free(q);
            heap.free(ptr::null_mut());
        }
    }
}
