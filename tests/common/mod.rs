#![allow(dead_code)]

use std::{
    collections::HashMap,
    ffi::c_void,
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use smtrace::{
    store::{AllocationRow, DeallocationRow},
    HeapAllocator, LibcHeap, Tracer, TracerConfig, WriterMode,
};

pub const MODES: [WriterMode; 2] = [WriterMode::Inline, WriterMode::Background];

pub fn tracer<H>(heap: H, mode: WriterMode) -> Tracer<H>
where
    H: HeapAllocator,
{
    Tracer::with_heap(heap, TracerConfig::in_memory().writer(mode)).expect("tracer should start")
}

/// Hands the most recently freed block back out whenever it is big enough,
/// so address reuse happens on demand. `realloc()` always moves.
#[derive(Debug, Default)]
pub struct RecyclingHeap {
    state: Mutex<Blocks>,
}

#[derive(Debug, Default)]
struct Blocks {
    capacity: HashMap<usize, usize>,
    free: Vec<usize>,
}

// SAFETY: every block comes from libc `malloc()` with at least the requested
// capacity, and a block is only handed out again after it was freed.
unsafe impl HeapAllocator for RecyclingHeap {
    fn malloc(&self, size: usize) -> *mut c_void {
        let mut blocks = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let reusable = blocks
            .free
            .iter()
            .rposition(|block| blocks.capacity[block] >= size);
        if let Some(index) = reusable {
            return blocks.free.remove(index) as *mut c_void;
        }
        let capacity = size.max(16);
        let block = LibcHeap.malloc(capacity);
        if !block.is_null() {
            blocks.capacity.insert(block as usize, capacity);
        }
        block
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }
        let new = self.malloc(size);
        if new.is_null() {
            return new;
        }
        let old_capacity = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capacity[&(ptr as usize)];
        unsafe {
            ptr::copy_nonoverlapping(ptr.cast::<u8>(), new.cast::<u8>(), old_capacity.min(size));
            self.free(ptr);
        }
        new
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if !ptr.is_null() {
            let mut blocks = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            blocks.free.push(ptr as usize);
        }
    }
}

impl Drop for RecyclingHeap {
    fn drop(&mut self) {
        let blocks = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for &block in blocks.capacity.keys() {
            // SAFETY: every key came from libc `malloc()` and is released once
            unsafe { LibcHeap.free(block as *mut c_void) };
        }
    }
}

/// A heap that is always out of memory
#[derive(Debug, Default)]
pub struct ExhaustedHeap;

// SAFETY: never returns a block
unsafe impl HeapAllocator for ExhaustedHeap {
    fn malloc(&self, _: usize) -> *mut c_void {
        ptr::null_mut()
    }

    unsafe fn realloc(&self, _: *mut c_void, _: usize) -> *mut c_void {
        ptr::null_mut()
    }

    unsafe fn free(&self, _: *mut c_void) {}
}

/// libc `malloc()` and `free()`, but `realloc()` to a non-zero size always
/// fails and leaves the block where it is
#[derive(Debug, Default)]
pub struct StuckHeap {
    failed_reallocs: AtomicUsize,
}

impl StuckHeap {
    pub fn failed_reallocs(&self) -> usize {
        self.failed_reallocs.load(Ordering::Relaxed)
    }
}

// SAFETY: blocks come from libc `malloc()`, a failed `realloc()` hands
// nothing out.
unsafe impl HeapAllocator for StuckHeap {
    fn malloc(&self, size: usize) -> *mut c_void {
        LibcHeap.malloc(size)
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            unsafe { self.free(ptr) };
        } else {
            self.failed_reallocs.fetch_add(1, Ordering::Relaxed);
        }
        ptr::null_mut()
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        unsafe { LibcHeap.free(ptr) }
    }
}

/// Every deallocation links to the newest allocation at its address that was
/// written before it, or to nothing if there is none.
pub fn assert_most_recent_links(allocations: &[AllocationRow], deallocations: &[DeallocationRow]) {
    for dealloc in deallocations {
        let expected = allocations
            .iter()
            .filter(|a| a.address == dealloc.address && a.date < dealloc.date)
            .max_by_key(|a| a.date)
            .map(|a| a.id);
        assert_eq!(
            dealloc.allocation_id, expected,
            "deallocation {} of {} linked to the wrong allocation",
            dealloc.id, dealloc.address
        );
    }
}
