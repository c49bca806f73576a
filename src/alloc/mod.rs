//! The heap being traced and the values the tracer keys its log on.

mod heap;
mod site;

pub use heap::{HeapAllocator, LibcHeap};
pub use site::{Address, CallSite};
