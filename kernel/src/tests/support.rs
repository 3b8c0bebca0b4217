//! Test fixtures shared by the unit and scenario suites.

use core::cell::RefCell;
use std::vec;
use std::vec::Vec;

use x86_64::PhysAddr;

use crate::allocator::Heap;
use crate::process::{AddressSpace, ContextSwitch, ProcessContext};

/// Marker the recording switch stores as the saved instruction pointer.
pub const SAVED_RIP: u64 = 0x5AFE_C0DE;

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; 16]);

/// Host memory standing in for a heap region, aligned to the block grid.
pub struct TestRegion {
    _chunks: Vec<Chunk>,
    base: *mut Chunk,
    len: usize,
}

impl TestRegion {
    pub fn new(bytes: usize) -> Self {
        let count = bytes.div_ceil(16);
        let mut chunks = vec![Chunk([0; 16]); count];
        let base = chunks.as_mut_ptr();
        Self {
            _chunks: chunks,
            base,
            len: count * 16,
        }
    }

    pub fn start(&mut self) -> usize {
        self.base as usize
    }

    pub fn end(&mut self) -> usize {
        self.base as usize + self.len
    }

    /// A heap spanning the whole region. The region must outlive it.
    pub fn heap(&mut self) -> Heap {
        unsafe { Heap::new(self.start(), self.end()) }
    }
}

/// Register state observed by one swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRecord {
    pub entered_rip: u64,
    pub entered_rsp: u64,
    pub entered_cr3: u64,
}

/// Swap primitive that records what it would have resumed instead of
/// jumping, so control always comes straight back.
#[derive(Default)]
pub struct RecordingSwitch {
    swaps: RefCell<Vec<SwapRecord>>,
}

impl RecordingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn swaps(&self) -> Vec<SwapRecord> {
        self.swaps.borrow().clone()
    }

    pub fn count(&self) -> usize {
        self.swaps.borrow().len()
    }
}

impl ContextSwitch for RecordingSwitch {
    unsafe fn switch(&self, old: *mut ProcessContext, new: *const ProcessContext) {
        let (old, new) = unsafe { (&mut *old, &*new) };
        old.rip = SAVED_RIP;
        self.swaps.borrow_mut().push(SwapRecord {
            entered_rip: new.rip,
            entered_rsp: new.rsp,
            entered_cr3: new.cr3,
        });
    }
}

/// Entry point for processes that are never actually run.
pub extern "C" fn idle_entry() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

pub extern "C" fn other_entry() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

pub fn kernel_space() -> AddressSpace {
    AddressSpace::new(PhysAddr::new(0x0010_0000))
}
