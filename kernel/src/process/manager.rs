//! Process Manager
//!
//! Lifecycle of processes: creation with a heap-allocated stack, cooperative
//! switching through a [`ContextSwitch`] and exit.

use core::fmt;

use super::context::{AddressSpace, ContextSwitch, ProcessContext};
use super::table::{Process, ProcessId, ProcessStack, ProcessState, ProcessTable};
use crate::allocator::Heap;
use crate::config::PROCESS_STACK_SIZE;

/// Function a new process starts executing.
pub type EntryPoint = extern "C" fn() -> !;

/// Process creation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Every user slot is taken
    TableFull,
    /// The heap could not provide a stack
    OutOfMemory,
    /// `init` has not run yet
    NotInitialized,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::TableFull => f.write_str("process table full"),
            ProcessError::OutOfMemory => f.write_str("out of memory for process stack"),
            ProcessError::NotInitialized => f.write_str("process manager not initialized"),
        }
    }
}

/// A validated switch whose bookkeeping is already done.
///
/// Produced by [`ProcessManager::prepare_switch`] so the swap itself can run
/// after any lock around the manager has been released.
#[derive(Debug)]
#[must_use = "a prepared switch does nothing until performed"]
pub struct SwitchFrame {
    pub from: ProcessId,
    pub to: ProcessId,
    old: *mut ProcessContext,
    new: *const ProcessContext,
}

impl SwitchFrame {
    /// Hand both contexts to the swap primitive.
    ///
    /// # Safety
    ///
    /// The manager that prepared this frame must still be alive at the same
    /// address, and no other switch may have been prepared since.
    pub unsafe fn perform<S: ContextSwitch + ?Sized>(self, switcher: &S) {
        #[cfg(feature = "trace-switch")]
        log::trace!("[Process] swap {} -> {}", self.from, self.to);
        unsafe { switcher.switch(self.old, self.new) }
    }
}

/// Process manager
pub struct ProcessManager {
    table: ProcessTable,
    current: ProcessId,
    kernel_space: Option<AddressSpace>,
}

impl ProcessManager {
    /// Create an uninitialised manager
    pub const fn new() -> Self {
        Self {
            table: ProcessTable::new(),
            current: ProcessId::KERNEL,
            kernel_space: None,
        }
    }

    /// Reset the table and adopt the caller as the kernel process (pid 0).
    ///
    /// Every process created afterwards runs in `kernel_space`. Stacks of
    /// processes from before a re-init are forgotten, not released.
    pub fn init(&mut self, kernel_space: AddressSpace) {
        self.table.reset(kernel_space);
        self.current = ProcessId::KERNEL;
        self.kernel_space = Some(kernel_space);
        log::debug!(
            "[Process] table ready, {} slots, kernel cr3 {:#x}",
            self.table.capacity(),
            kernel_space.as_u64()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.kernel_space.is_some()
    }

    /// Create a process starting at `entry` with a fresh stack from `heap`.
    ///
    /// On failure the table is left unchanged.
    pub fn create(&mut self, heap: &mut Heap, entry: EntryPoint) -> Result<ProcessId, ProcessError> {
        let space = self.kernel_space.ok_or(ProcessError::NotInitialized)?;
        let pid = self.table.find_free().ok_or(ProcessError::TableFull)?;
        let slot = self.table.get_mut(pid).ok_or(ProcessError::TableFull)?;
        let base = heap
            .allocate(PROCESS_STACK_SIZE)
            .ok_or(ProcessError::OutOfMemory)?;

        let stack = ProcessStack::new(base, PROCESS_STACK_SIZE);
        let context = ProcessContext::new_kernel(entry as usize as u64, stack.initial_sp(), space);

        *slot = Process {
            pid,
            state: ProcessState::Active,
            context,
            stack: Some(stack),
            address_space: space,
            exit_status: None,
        };

        log::debug!(
            "[Process] created {} entry={:#x} sp={:#x}",
            pid,
            context.rip,
            context.rsp
        );
        Ok(pid)
    }

    /// Validate a switch to `pid` and make it current.
    ///
    /// Returns `None` for a no-op: unknown or inactive target, the current
    /// process itself, or an uninitialised manager.
    pub fn prepare_switch(&mut self, pid: ProcessId) -> Option<SwitchFrame> {
        if !self.is_initialized() {
            log::debug!("[Process] switch to {} before init ignored", pid);
            return None;
        }
        if pid == self.current {
            return None;
        }
        match self.table.get(pid) {
            Some(target) if target.is_active() => {}
            Some(_) => {
                log::debug!("[Process] switch to inactive pid {} ignored", pid);
                return None;
            }
            None => {
                log::debug!("[Process] switch to out-of-range pid {} ignored", pid);
                return None;
            }
        }

        let from = self.current;
        let old = &mut self.table.get_mut(from)?.context as *mut ProcessContext;
        let new = &self.table.get(pid)?.context as *const ProcessContext;
        self.current = pid;

        Some(SwitchFrame {
            from,
            to: pid,
            old,
            new,
        })
    }

    /// Switch to `pid`, returning once something switches back.
    ///
    /// Nothing read from the manager before the call may be assumed to hold
    /// afterwards.
    pub fn switch<S: ContextSwitch + ?Sized>(&mut self, switcher: &S, pid: ProcessId) {
        if let Some(frame) = self.prepare_switch(pid) {
            // SAFETY: both contexts live in `self.table`, which `&mut self`
            // keeps in place for the whole call.
            unsafe { frame.perform(switcher) };
        }
    }

    /// Retire the current process, handing its stack back to the caller.
    ///
    /// Returns `None` when the current process is the kernel.
    pub fn prepare_exit(&mut self, status: i32) -> Option<ProcessStack> {
        let pid = self.current;
        if pid.is_kernel() || !self.is_initialized() {
            log::debug!("[Process] exit({}) from kernel ignored", status);
            return None;
        }

        let process = self.table.get_mut(pid)?;
        let stack = process.stack.take();
        process.exit_status = Some(status);
        process.state = ProcessState::Free;

        log::debug!("[Process] {} exited with status {}", pid, status);
        stack
    }

    /// Terminate the current process and switch to the kernel.
    ///
    /// The stack is released before the switch while it may still be the one
    /// executing; nothing allocates from the heap before the swap.
    pub fn exit<S: ContextSwitch + ?Sized>(&mut self, heap: &mut Heap, switcher: &S, status: i32) {
        let pid = self.current;
        if pid.is_kernel() || !self.is_initialized() {
            log::debug!("[Process] exit({}) from kernel ignored", status);
            return;
        }
        if let Some(stack) = self.prepare_exit(status) {
            release_stack(heap, pid, stack);
        }
        self.switch(switcher, ProcessId::KERNEL);
    }

    /// Currently running process
    pub fn current(&self) -> ProcessId {
        self.current
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.table.get(pid)
    }

    /// Processes not in the free state, kernel included.
    pub fn active_count(&self) -> usize {
        self.table.active_count()
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.table.iter()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Return an exited process's stack to the heap.
pub(crate) fn release_stack(heap: &mut Heap, pid: ProcessId, stack: ProcessStack) {
    // SAFETY: the stack came from `heap.allocate` in `create` and its owner
    // has just been retired.
    if let Err(err) = unsafe { heap.deallocate(stack.base().as_ptr()) } {
        log::error!("[Process] could not release stack of {}: {}", pid, err);
    }
}
