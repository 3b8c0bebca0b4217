//! First-fit heap over a fixed region.
//!
//! The heap keeps no memory of its own: all bookkeeping lives in
//! [`BlockHeader`]s written into the managed region. Allocation scans the
//! address-ordered block list for the first free block that fits, splitting
//! off the tail when the remainder is worth keeping. Deallocation merges the
//! released block with free neighbours on both sides.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use super::block::{
    align_down, align_up, BlockHeader, BlockInfo, BlockState, HEADER_SIZE,
};
use crate::config::{BLOCK_ALIGN, SPLIT_THRESHOLD};

/// Reasons a pointer handed to [`Heap::deallocate`] is rejected.
///
/// A rejected call leaves the heap untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The pointer does not fall inside the payload area of the region.
    OutOfRange { addr: usize },
    /// The pointer is inside the region but not on the block grid.
    Misaligned { addr: usize },
    /// The recovered header does not carry the block tag.
    BadTag { addr: usize },
    /// The block is already free.
    DoubleFree { addr: usize },
    /// The block list violates a structural invariant at this header.
    Corrupted { addr: usize },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfRange { addr } => write!(f, "pointer {:#x} outside heap", addr),
            HeapError::Misaligned { addr } => write!(f, "pointer {:#x} not on block grid", addr),
            HeapError::BadTag { addr } => write!(f, "no block header behind {:#x}", addr),
            HeapError::DoubleFree { addr } => write!(f, "block at {:#x} already free", addr),
            HeapError::Corrupted { addr } => write!(f, "block list corrupted at {:#x}", addr),
        }
    }
}

/// Snapshot of heap usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Payload bytes across all blocks.
    pub total: usize,
    /// Payload bytes in used blocks.
    pub used: usize,
    /// Largest single free payload.
    pub largest_free: usize,
    /// Number of blocks in the list.
    pub blocks: usize,
}

impl HeapStats {
    pub fn free(&self) -> usize {
        self.total - self.used
    }
}

/// A first-fit allocator over one contiguous region.
pub struct Heap {
    head: Option<NonNull<BlockHeader>>,
    start: usize,
    end: usize,
}

/// The heap is only reached through `&mut` or a lock, and the region it
/// points into is owned by it exclusively.
unsafe impl Send for Heap {}

impl Heap {
    /// An uninitialised heap. Every allocation fails until [`Heap::init`].
    pub const fn empty() -> Self {
        Self {
            head: None,
            start: 0,
            end: 0,
        }
    }

    /// Create a heap over `[region_start, region_end)`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::init`].
    pub unsafe fn new(region_start: usize, region_end: usize) -> Self {
        let mut heap = Self::empty();
        unsafe { heap.init(region_start, region_end) };
        heap
    }

    /// Take over `[region_start, region_end)` as a single free block.
    ///
    /// The bounds are trimmed inward to the block grid. A region too small
    /// for one header and one aligned payload leaves the heap empty.
    ///
    /// Calling this again forgets every block handed out before; pointers
    /// from the previous generation must not be used afterwards.
    ///
    /// # Safety
    ///
    /// The region must be mapped, writable, and used by nothing but this
    /// heap for as long as the heap is alive.
    pub unsafe fn init(&mut self, region_start: usize, region_end: usize) {
        let start = align_up(region_start, BLOCK_ALIGN).unwrap_or(region_end);
        let end = align_down(region_end, BLOCK_ALIGN);

        if end < start || end - start < HEADER_SIZE + BLOCK_ALIGN {
            log::warn!(
                "[Heap] region {:#x}..{:#x} too small, heap left empty",
                region_start,
                region_end
            );
            self.head = None;
            self.start = start;
            self.end = start;
            return;
        }

        let root = start as *mut BlockHeader;
        // SAFETY: the caller hands over the region; `start` is aligned and
        // there is room for at least one header.
        unsafe { ptr::write(root, BlockHeader::free(end - start - HEADER_SIZE)) };

        self.head = NonNull::new(root);
        self.start = start;
        self.end = end;

        log::debug!(
            "[Heap] managing {:#x}..{:#x} ({} bytes)",
            start,
            end,
            end - start
        );
    }

    /// First managed address.
    pub fn bottom(&self) -> usize {
        self.start
    }

    /// First address past the managed region.
    pub fn top(&self) -> usize {
        self.end
    }

    /// Bytes under management, headers included.
    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Bytes of metadata in front of every payload.
    pub const fn header_size() -> usize {
        HEADER_SIZE
    }

    /// Allocate `size` bytes, 16-byte aligned.
    ///
    /// Returns `None` for a zero-sized request or when no free block is
    /// large enough.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = align_up(size, BLOCK_ALIGN)?;

        let block = self.find_first_fit(size)?;
        // SAFETY: `block` came from the list, so it is a live header inside
        // the region.
        unsafe {
            Self::split(block, size);
            (*block.as_ptr()).set_state(BlockState::Used);
        }

        let payload = BlockHeader::payload(block);
        #[cfg(feature = "trace-heap")]
        log::trace!("[Heap] allocate {} bytes at {:p}", size, payload);
        Some(payload)
    }

    /// Release a block handed out by [`Heap::allocate`].
    ///
    /// A null pointer is a no-op. Pointers that cannot be traced back to a
    /// used block are rejected with a [`HeapError`] and leave the heap as it
    /// was.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer previously returned by `allocate` on
    /// this heap. The tag check catches many mistakes, but a forged pointer
    /// into a payload whose bytes happen to look like a header is not
    /// detectable.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) -> Result<(), HeapError> {
        if ptr.is_null() {
            return Ok(());
        }

        let block = self.header_of(ptr).map_err(|err| {
            log::warn!("[Heap] rejected free: {}", err);
            err
        })?;

        // SAFETY: `header_of` checked that the header lies inside the region
        // on the block grid, so it is readable memory owned by the heap.
        unsafe {
            let header = block.as_ptr();
            if !(*header).is_valid() {
                let err = HeapError::BadTag { addr: ptr as usize };
                log::warn!("[Heap] rejected free: {}", err);
                return Err(err);
            }
            if (*header).is_free() {
                let err = HeapError::DoubleFree { addr: ptr as usize };
                log::warn!("[Heap] rejected free: {}", err);
                return Err(err);
            }

            (*header).set_state(BlockState::Free);
            #[cfg(feature = "trace-heap")]
            log::trace!("[Heap] free {} bytes at {:p}", (*header).size, ptr);

            let mut merged = block;
            if let Some(prev) = (*header).prev {
                if (*prev.as_ptr()).is_free() {
                    Self::absorb_next(prev);
                    merged = prev;
                }
            }
            if let Some(next) = (*merged.as_ptr()).next {
                if (*next.as_ptr()).is_free() {
                    Self::absorb_next(merged);
                }
            }
        }

        Ok(())
    }

    /// Usage summary gathered in one pass over the block list.
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(HeapStats::default(), |mut stats, block| {
            stats.total += block.size;
            stats.blocks += 1;
            match block.state {
                BlockState::Used => stats.used += block.size,
                BlockState::Free => stats.largest_free = stats.largest_free.max(block.size),
            }
            stats
        })
    }

    /// Iterate over the blocks in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            next: self.head,
            _heap: PhantomData,
        }
    }

    /// Walk the list and verify every structural invariant: valid tags,
    /// contiguous address order, consistent back links, no two adjacent free
    /// blocks, and blocks that exactly cover the region.
    pub fn check_invariants(&self) -> Result<(), HeapError> {
        let mut expected = self.start;
        let mut prev: Option<NonNull<BlockHeader>> = None;
        let mut prev_free = false;
        let mut cursor = self.head;

        while let Some(block) = cursor {
            let addr = block.as_ptr() as usize;
            if addr != expected || addr >= self.end {
                return Err(HeapError::Corrupted { addr });
            }
            // SAFETY: `addr` is the next expected header inside the region.
            let header = unsafe { &*block.as_ptr() };
            if !header.is_valid() || header.prev != prev || (prev_free && header.is_free()) {
                return Err(HeapError::Corrupted { addr });
            }

            expected = match addr
                .checked_add(HEADER_SIZE)
                .and_then(|a| a.checked_add(header.size))
            {
                Some(next) => next,
                None => return Err(HeapError::Corrupted { addr }),
            };
            prev = Some(block);
            prev_free = header.is_free();
            cursor = header.next;
        }

        if expected != self.end {
            return Err(HeapError::Corrupted { addr: expected });
        }
        Ok(())
    }

    fn find_first_fit(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let mut cursor = self.head;
        while let Some(block) = cursor {
            // SAFETY: list members are live headers inside the region.
            let header = unsafe { &*block.as_ptr() };
            if header.is_free() && header.size >= size {
                return Some(block);
            }
            cursor = header.next;
        }
        None
    }

    /// Map a payload pointer back to the header in front of it.
    fn header_of(&self, ptr: *mut u8) -> Result<NonNull<BlockHeader>, HeapError> {
        let addr = ptr as usize;
        if self.head.is_none() || addr < self.start + HEADER_SIZE || addr >= self.end {
            return Err(HeapError::OutOfRange { addr });
        }
        if (addr - self.start) % BLOCK_ALIGN != 0 {
            return Err(HeapError::Misaligned { addr });
        }
        NonNull::new((addr - HEADER_SIZE) as *mut BlockHeader).ok_or(HeapError::OutOfRange { addr })
    }

    /// Carve a free block off the tail of `block` if more than a header plus
    /// [`SPLIT_THRESHOLD`] bytes would be left over.
    ///
    /// # Safety
    ///
    /// `block` must be a live header with `size <= block.size`.
    unsafe fn split(block: NonNull<BlockHeader>, size: usize) {
        let header = block.as_ptr();
        unsafe {
            let remaining = (*header).size - size;
            if remaining <= HEADER_SIZE + SPLIT_THRESHOLD {
                return;
            }

            let tail = (header as *mut u8).add(HEADER_SIZE + size) as *mut BlockHeader;
            let mut tail_header = BlockHeader::free(remaining - HEADER_SIZE);
            tail_header.next = (*header).next;
            tail_header.prev = Some(block);
            ptr::write(tail, tail_header);

            let tail = NonNull::new_unchecked(tail);
            if let Some(next) = (*header).next {
                (*next.as_ptr()).prev = Some(tail);
            }
            (*header).next = Some(tail);
            (*header).size = size;
        }
    }

    /// Merge the block following `block` into it and retire its header.
    ///
    /// # Safety
    ///
    /// `block` must be a live header.
    unsafe fn absorb_next(block: NonNull<BlockHeader>) {
        let header = block.as_ptr();
        unsafe {
            let Some(next) = (*header).next else {
                return;
            };
            let next = next.as_ptr();

            (*header).size += HEADER_SIZE + (*next).size;
            (*header).next = (*next).next;
            if let Some(after) = (*next).next {
                (*after.as_ptr()).prev = Some(block);
            }
            (*next).retire();
        }
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("bottom", &format_args!("{:#x}", self.start))
            .field("top", &format_args!("{:#x}", self.end))
            .field("stats", &self.stats())
            .finish()
    }
}

/// Iterator over the blocks of a [`Heap`].
pub struct Blocks<'a> {
    next: Option<NonNull<BlockHeader>>,
    _heap: PhantomData<&'a Heap>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        // SAFETY: the iterator borrows the heap, so the list cannot change
        // underneath it and every link points at a live header.
        let header = unsafe { &*block.as_ptr() };
        self.next = header.next;
        Some(BlockInfo {
            header: block.as_ptr() as usize,
            size: header.size,
            state: header.state(),
        })
    }
}
