//! Kernel core facade.
//!
//! [`Kernel`] owns the heap, the process manager and the context-switch
//! capability, and is the entry point the boot code and processes call into.
//! It is meant to live in a `static`, hence the spin locks; the core is
//! single-core and cooperative, the locks only make shared access sound.
//!
//! Lock order: the process lock is always taken before the heap lock, and
//! neither is held across a context swap.

use core::ptr::NonNull;

use spin::Mutex;

use crate::allocator::{Heap, HeapError, HeapStats, LockedHeap};
use crate::config::DEBUG_ENABLED;
use crate::process::manager::release_stack;
use crate::process::{
    AddressSpace, ContextSwitch, EntryPoint, ProcessError, ProcessId, ProcessManager,
};

pub struct Kernel<S> {
    heap: LockedHeap,
    processes: Mutex<ProcessManager>,
    switcher: S,
}

impl<S: ContextSwitch> Kernel<S> {
    pub const fn new(switcher: S) -> Self {
        Self {
            heap: LockedHeap::empty(),
            processes: Mutex::new(ProcessManager::new()),
            switcher,
        }
    }

    /// Initialise the heap over the fixed kernel heap window.
    ///
    /// # Safety
    ///
    /// `HEAP_START..HEAP_END` must be mapped, writable and otherwise unused.
    pub unsafe fn init_memory(&self) {
        unsafe { self.heap.init_default() };
    }

    /// Initialise the heap over `[start, end)`.
    ///
    /// # Safety
    ///
    /// See [`Heap::init`].
    pub unsafe fn init_memory_region(&self, start: usize, end: usize) {
        unsafe { self.heap.init(start, end) };
    }

    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.heap.lock().allocate(size)
    }

    /// Release memory from [`Kernel::allocate`].
    ///
    /// # Safety
    ///
    /// See [`Heap::deallocate`].
    pub unsafe fn deallocate(&self, ptr: *mut u8) -> Result<(), HeapError> {
        let mut heap = self.heap.lock();
        unsafe { heap.deallocate(ptr) }?;
        audit(&heap);
        Ok(())
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    /// Reset the process table and register the caller as pid 0.
    pub fn init_processes(&self, kernel_space: AddressSpace) {
        self.processes.lock().init(kernel_space);
    }

    /// Same as [`Kernel::init_processes`], using the address space in CR3.
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    pub fn init_processes_active(&self) {
        self.init_processes(AddressSpace::active());
    }

    pub fn create(&self, entry: EntryPoint) -> Result<ProcessId, ProcessError> {
        let mut processes = self.processes.lock();
        let mut heap = self.heap.lock();
        processes.create(&mut heap, entry)
    }

    /// Cooperatively switch to `pid`.
    ///
    /// Unknown, inactive or current targets are ignored.
    pub fn switch(&self, pid: ProcessId) {
        let frame = self.processes.lock().prepare_switch(pid);
        if let Some(frame) = frame {
            // SAFETY: the contexts live inside `self`, which outlives the
            // call, and the lock is released before the swap.
            unsafe { frame.perform(&self.switcher) };
        }
    }

    /// Terminate the current process and return to the kernel.
    ///
    /// Ignored when called from the kernel itself. With a real swap routine
    /// this does not return.
    pub fn exit(&self, status: i32) {
        let frame = {
            let mut processes = self.processes.lock();
            let pid = processes.current();
            let Some(stack) = processes.prepare_exit(status) else {
                return;
            };

            let mut heap = self.heap.lock();
            release_stack(&mut heap, pid, stack);
            audit(&heap);
            drop(heap);

            processes.prepare_switch(ProcessId::KERNEL)
        };
        if let Some(frame) = frame {
            // SAFETY: as in `switch`.
            unsafe { frame.perform(&self.switcher) };
        }
    }

    pub fn current(&self) -> ProcessId {
        self.processes.lock().current()
    }

    /// Run `f` with the process manager locked.
    ///
    /// `f` must not call back into this kernel's process operations.
    pub fn with_processes<R>(&self, f: impl FnOnce(&ProcessManager) -> R) -> R {
        let processes = self.processes.lock();
        f(&*processes)
    }

    pub fn heap(&self) -> &LockedHeap {
        &self.heap
    }

    pub fn switcher(&self) -> &S {
        &self.switcher
    }
}

/// Verify the heap after a release in debug builds.
fn audit(heap: &Heap) {
    if DEBUG_ENABLED {
        if let Err(err) = heap.check_invariants() {
            log::error!("[Heap] invariant violated: {}", err);
        }
    }
}
