//! In-place block headers.
//!
//! Every span of the heap region starts with a [`BlockHeader`]; the payload
//! handed to callers follows it immediately. Headers are linked in ascending
//! address order, so the list is also a map of the whole region.

use core::mem::size_of;
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::config::{BLOCK_ALIGN, BLOCK_TAG};

/// Bytes reserved in front of every payload, rounded to the block grid.
pub const HEADER_SIZE: usize = align_up_const(size_of::<BlockHeader>(), BLOCK_ALIGN);

bitflags! {
    /// Flag word stored in every block header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        /// The payload is handed out to a caller.
        const USED = 1 << 0;
    }
}

/// Allocation state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Used,
}

/// Header stored at the head of each block.
#[repr(C)]
pub struct BlockHeader {
    /// Must equal [`BLOCK_TAG`] for the header to be trusted.
    pub tag: u32,
    pub flags: BlockFlags,
    /// Payload bytes owned by this block (header excluded).
    pub size: usize,
    pub next: Option<NonNull<BlockHeader>>,
    pub prev: Option<NonNull<BlockHeader>>,
}

impl BlockHeader {
    /// A tagged, free header with no neighbours.
    pub const fn free(size: usize) -> Self {
        Self {
            tag: BLOCK_TAG,
            flags: BlockFlags::empty(),
            size,
            next: None,
            prev: None,
        }
    }

    /// Whether the sentinel is intact.
    pub fn is_valid(&self) -> bool {
        self.tag == BLOCK_TAG
    }

    pub fn state(&self) -> BlockState {
        if self.flags.contains(BlockFlags::USED) {
            BlockState::Used
        } else {
            BlockState::Free
        }
    }

    pub fn is_free(&self) -> bool {
        self.state() == BlockState::Free
    }

    pub fn set_state(&mut self, state: BlockState) {
        self.flags.set(BlockFlags::USED, state == BlockState::Used);
    }

    /// Clear the sentinel of a header that no longer starts a block.
    pub fn retire(&mut self) {
        self.tag = 0;
        self.flags = BlockFlags::empty();
    }

    /// Payload address of the block starting at `header`.
    pub fn payload(header: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: headers live inside the region and are followed by at
        // least one aligned payload, so the offset stays in bounds.
        unsafe { NonNull::new_unchecked((header.as_ptr() as *mut u8).add(HEADER_SIZE)) }
    }
}

/// Read-only view of one block, produced by [`Heap::blocks`](super::Heap::blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the header.
    pub header: usize,
    /// Payload bytes.
    pub size: usize,
    pub state: BlockState,
}

impl BlockInfo {
    /// Address of the first payload byte.
    pub fn payload(&self) -> usize {
        self.header + HEADER_SIZE
    }

    /// First address past this block.
    pub fn end(&self) -> usize {
        self.payload() + self.size
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
pub(crate) const fn align_up_const(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Checked variant of [`align_up_const`] for caller-supplied values.
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

pub(crate) fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}
