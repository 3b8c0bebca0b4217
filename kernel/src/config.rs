//! Kernel configuration constants.
//!
//! This module contains compile-time configuration for the kernel core.
//! Values here affect the heap layout, block bookkeeping and the
//! initial register state of every process.

use x86_64::registers::rflags::RFlags;
use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 0x1000;

/// Start of the managed heap region (2 MB).
///
/// The region must already be mapped and writable when the heap is
/// initialised; the boot code owns that guarantee.
pub const HEAP_START: usize = 0x0020_0000;

/// End (exclusive) of the managed heap region (1 GB).
pub const HEAP_END: usize = 0x4000_0000;

/// Sentinel stored in every block header ("BLKC").
pub const BLOCK_TAG: u32 = 0x424C_4B43;

/// Payload alignment and size granularity of the heap.
pub const BLOCK_ALIGN: usize = 16;

/// Extra payload bytes a block must have beyond a new header before it is split.
pub const SPLIT_THRESHOLD: usize = 64;

/// Number of slots in the process table, kernel slot included.
pub const MAX_PROCESSES: usize = 16;

/// Stack size per process (64 KB).
pub const PROCESS_STACK_SIZE: usize = 0x10000;

/// Bytes kept free between the top of a process stack and its initial stack pointer.
pub const STACK_TOP_MARGIN: usize = 16;

/// Kernel code segment selector (GDT index 1, ring 0 → 0x08).
pub const KERNEL_CODE_SELECTOR: SegmentSelector = SegmentSelector::new(1, PrivilegeLevel::Ring0);

/// Kernel data segment selector (GDT index 2, ring 0 → 0x10).
pub const KERNEL_DATA_SELECTOR: SegmentSelector = SegmentSelector::new(2, PrivilegeLevel::Ring0);

/// Initial RFLAGS of a new process: IF set, reserved bit 1 set (0x202).
pub const INITIAL_RFLAGS: u64 = RFlags::INTERRUPT_FLAG.bits() | 0x2;

/// Enable kernel debugging features based on build profile.
pub const DEBUG_ENABLED: bool = cfg!(debug_assertions);
