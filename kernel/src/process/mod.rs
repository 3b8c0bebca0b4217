//! Process Management
//!
//! A fixed table of cooperatively scheduled kernel processes. Slot 0 is the
//! kernel itself; the others are created with their own heap-allocated stack
//! and share the kernel's address space.

pub mod context;
pub mod manager;
pub mod table;

#[cfg(target_os = "none")]
pub use context::ExternSwitch;
pub use context::{AddressSpace, ContextSwitch, ProcessContext};
pub use manager::{EntryPoint, ProcessError, ProcessManager, SwitchFrame};
pub use table::{Process, ProcessId, ProcessStack, ProcessState, ProcessTable};
