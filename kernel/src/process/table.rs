//! Process Table
//!
//! Fixed array of process descriptors indexed by pid. Slot 0 is the kernel.

use core::fmt;
use core::ptr::NonNull;

use x86_64::PhysAddr;

use super::context::{AddressSpace, ProcessContext};
use crate::config::{MAX_PROCESSES, STACK_TOP_MARGIN};

/// Process ID type
///
/// A pid is the index of its slot in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl ProcessId {
    /// Kernel process ID (always 0)
    pub const KERNEL: ProcessId = ProcessId(0);

    /// Get the raw ID value
    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn is_kernel(&self) -> bool {
        *self == Self::KERNEL
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is unused
    Free,
    /// Process exists and may be switched to
    Active,
    /// Reserved for blocking primitives; nothing enters this state yet
    Blocked,
}

/// Stack memory owned by one process.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessStack {
    base: NonNull<u8>,
    size: usize,
}

/// The stack is plain memory owned by exactly one descriptor.
unsafe impl Send for ProcessStack {}

impl ProcessStack {
    pub fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// First address past the stack.
    pub fn top(&self) -> u64 {
        (self.base.as_ptr() as usize + self.size) as u64
    }

    /// Stack pointer a new process starts with.
    pub fn initial_sp(&self) -> u64 {
        self.top() - STACK_TOP_MARGIN as u64
    }
}

/// Process descriptor
#[derive(Debug)]
pub struct Process {
    pub pid: ProcessId,
    pub state: ProcessState,
    /// Saved CPU state; only written by `create` and the swap routine.
    pub context: ProcessContext,
    /// `None` for the kernel and free slots.
    pub stack: Option<ProcessStack>,
    pub address_space: AddressSpace,
    /// Status passed to the last `exit` of this slot.
    pub exit_status: Option<i32>,
}

impl Process {
    const VACANT: Process = Process {
        pid: ProcessId(0),
        state: ProcessState::Free,
        context: ProcessContext::new(),
        stack: None,
        address_space: AddressSpace::new(PhysAddr::zero()),
        exit_status: None,
    };

    pub fn is_active(&self) -> bool {
        self.state == ProcessState::Active
    }

    pub fn is_free(&self) -> bool {
        self.state == ProcessState::Free
    }
}

/// Process table
pub struct ProcessTable {
    slots: [Process; MAX_PROCESSES],
}

impl ProcessTable {
    /// A table with every slot free.
    pub const fn new() -> Self {
        let mut slots = [Process::VACANT; MAX_PROCESSES];
        let mut i = 0;
        while i < MAX_PROCESSES {
            slots[i].pid = ProcessId(i);
            i += 1;
        }
        Self { slots }
    }

    /// Free every slot, then install the kernel in slot 0.
    ///
    /// Stacks still owned by old descriptors are forgotten, not released.
    pub fn reset(&mut self, kernel_space: AddressSpace) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            *slot = Process {
                pid: ProcessId(i),
                ..Process::VACANT
            };
        }
        let kernel = &mut self.slots[ProcessId::KERNEL.0];
        kernel.state = ProcessState::Active;
        kernel.address_space = kernel_space;
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.slots.get(pid.0)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.slots.get_mut(pid.0)
    }

    /// Lowest free user slot.
    pub fn find_free(&self) -> Option<ProcessId> {
        self.slots
            .iter()
            .skip(1)
            .find(|p| p.is_free())
            .map(|p| p.pid)
    }

    /// Number of slots not free, kernel included.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|p| !p.is_free()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter()
    }

    pub fn capacity(&self) -> usize {
        MAX_PROCESSES
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> AddressSpace {
        AddressSpace::new(PhysAddr::new(0x5000))
    }

    #[test]
    fn test_new_table_all_free() {
        let table = ProcessTable::new();
        assert_eq!(table.active_count(), 0);
        for (i, p) in table.iter().enumerate() {
            assert_eq!(p.pid, ProcessId(i));
            assert!(p.is_free());
        }
    }

    #[test]
    fn test_reset_installs_kernel() {
        let mut table = ProcessTable::new();
        table.reset(space());

        let kernel = table.get(ProcessId::KERNEL).unwrap();
        assert!(kernel.is_active());
        assert!(kernel.stack.is_none());
        assert_eq!(kernel.address_space, space());
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_find_free_skips_kernel() {
        let mut table = ProcessTable::new();
        assert_eq!(table.find_free(), Some(ProcessId(1)));

        table.reset(space());
        table.get_mut(ProcessId(1)).unwrap().state = ProcessState::Active;
        assert_eq!(table.find_free(), Some(ProcessId(2)));

        for i in 2..MAX_PROCESSES {
            table.get_mut(ProcessId(i)).unwrap().state = ProcessState::Active;
        }
        assert_eq!(table.find_free(), None);
    }

    #[test]
    fn test_get_out_of_range() {
        let table = ProcessTable::new();
        assert!(table.get(ProcessId(MAX_PROCESSES)).is_none());
    }

    #[test]
    fn test_stack_initial_sp() {
        let mut buf = [0u8; 64];
        let base = NonNull::new(buf.as_mut_ptr()).unwrap();
        let stack = ProcessStack::new(base, 64);
        assert_eq!(stack.top(), base.as_ptr() as u64 + 64);
        assert_eq!(stack.initial_sp(), stack.top() - 16);
    }

    #[test]
    fn test_process_id_display() {
        use std::string::ToString;
        assert_eq!(ProcessId(7).to_string(), "7");
        assert!(ProcessId::KERNEL.is_kernel());
    }
}
