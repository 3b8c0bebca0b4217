//! Moonlight Kernel Core
//!
//! Memory and process management for the Moonlight kernel: a first-fit heap
//! allocator over a fixed region and a fixed table of cooperatively switched
//! processes.
//!
//! # Usage
//!
//! - The boot code maps the heap region, then calls [`Kernel::init_memory`]
//!   and [`Kernel::init_processes`].
//! - The architecture layer supplies the register swap through
//!   [`process::ContextSwitch`] (`switch_context` on bare metal).
//! - `cargo test` runs every suite on the host against in-memory regions.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod allocator;
pub mod config;
pub mod process;
pub mod system;

#[cfg(test)]
mod tests;

pub use allocator::{Heap, HeapError, HeapStats, LockedHeap};
pub use process::{AddressSpace, ContextSwitch, ProcessContext, ProcessError, ProcessId};
pub use system::Kernel;
