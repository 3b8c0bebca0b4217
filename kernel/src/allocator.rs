//! Kernel heap allocator.
//!
//! A first-fit allocator whose bookkeeping lives in headers written into the
//! managed region itself. [`Heap`] is the single-owner core; [`LockedHeap`]
//! wraps it in a spin lock for shared use and implements [`GlobalAlloc`].

mod block;
mod heap;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::{Mutex, MutexGuard};

pub use block::{BlockFlags, BlockHeader, BlockInfo, BlockState, HEADER_SIZE};
pub use heap::{Blocks, Heap, HeapError, HeapStats};

use crate::config::{BLOCK_ALIGN, HEAP_END, HEAP_START};

/// Heap behind a spin lock.
///
/// Not registered as `#[global_allocator]` here; the boot crate decides
/// whether to do so.
pub struct LockedHeap(Mutex<Heap>);

impl LockedHeap {
    /// An uninitialised heap. Allocations fail until [`LockedHeap::init`].
    pub const fn empty() -> Self {
        Self(Mutex::new(Heap::empty()))
    }

    /// Initialise over `[start, end)`.
    ///
    /// # Safety
    ///
    /// See [`Heap::init`].
    pub unsafe fn init(&self, start: usize, end: usize) {
        unsafe { self.0.lock().init(start, end) };
    }

    /// Initialise over the fixed kernel heap window.
    ///
    /// # Safety
    ///
    /// `HEAP_START..HEAP_END` must be mapped and writable.
    pub unsafe fn init_default(&self) {
        unsafe { self.init(HEAP_START, HEAP_END) };
    }

    pub fn lock(&self) -> MutexGuard<'_, Heap> {
        self.0.lock()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > BLOCK_ALIGN {
            return ptr::null_mut();
        }
        self.0
            .lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // Rejections are already logged by the heap.
        let _ = unsafe { self.0.lock().deallocate(ptr) };
    }
}
