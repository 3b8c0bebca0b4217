//! Process Context
//!
//! Saved CPU state of a process and the capability that swaps between two
//! saved states.

use x86_64::PhysAddr;

use crate::config::{INITIAL_RFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};

/// Page-table root a process runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(PhysAddr);

impl AddressSpace {
    pub const fn new(root: PhysAddr) -> Self {
        Self(root)
    }

    pub fn root(&self) -> PhysAddr {
        self.0
    }

    pub fn as_u64(&self) -> u64 {
        self.0.as_u64()
    }

    /// The address space the CPU is currently running in.
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    pub fn active() -> Self {
        let (frame, _) = x86_64::registers::control::Cr3::read();
        Self(frame.start_address())
    }
}

/// CPU register context for context switching
///
/// The layout is shared with the architecture's swap routine and must not be
/// reordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ProcessContext {
    // General purpose registers
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    /// RBP register (frame pointer)
    pub rbp: u64,
    /// Stack pointer
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    /// Instruction pointer
    pub rip: u64,
    pub rflags: u64,

    // Segment selectors
    pub cs: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    pub ss: u64,

    /// Page-table root loaded on entry
    pub cr3: u64,
}

impl ProcessContext {
    /// Create a new empty context
    pub const fn new() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
            cs: 0,
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
            ss: 0,
            cr3: 0,
        }
    }

    /// Create a context for a kernel-mode process
    ///
    /// # Arguments
    ///
    /// * `entry_point` - Address execution starts at
    /// * `stack_pointer` - Initial stack pointer
    /// * `space` - Address space to run under
    pub fn new_kernel(entry_point: u64, stack_pointer: u64, space: AddressSpace) -> Self {
        let data = u64::from(KERNEL_DATA_SELECTOR.0);
        Self {
            rip: entry_point,
            rsp: stack_pointer,
            rflags: INITIAL_RFLAGS,
            cs: u64::from(KERNEL_CODE_SELECTOR.0),
            ds: data,
            es: data,
            ss: data,
            cr3: space.as_u64(),
            ..Self::new()
        }
    }
}

/// Saves the running CPU state into one context and resumes another.
///
/// The kernel core never touches registers itself; the architecture layer
/// supplies this capability.
pub trait ContextSwitch {
    /// Save the current state into `old` and continue from `new`.
    ///
    /// Returns only once some later switch resumes `old`.
    ///
    /// # Safety
    ///
    /// `old` must be writable and `new` must describe a resumable state whose
    /// stack and address space are still valid. Both must stay valid until
    /// the call returns.
    unsafe fn switch(&self, old: *mut ProcessContext, new: *const ProcessContext);
}

#[cfg(target_os = "none")]
extern "C" {
    /// Provided by the architecture layer at link time.
    fn switch_context(old: *mut ProcessContext, new: *const ProcessContext);
}

/// Swap through the linker-provided `switch_context` routine.
#[cfg(target_os = "none")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternSwitch;

#[cfg(target_os = "none")]
impl ContextSwitch for ExternSwitch {
    unsafe fn switch(&self, old: *mut ProcessContext, new: *const ProcessContext) {
        unsafe { switch_context(old, new) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_zeroed() {
        assert_eq!(ProcessContext::new(), ProcessContext::default());
    }

    #[test]
    fn test_kernel_context_registers() {
        let space = AddressSpace::new(PhysAddr::new(0x1000));
        let ctx = ProcessContext::new_kernel(0xdead_0000, 0x8000_fff0, space);

        assert_eq!(ctx.rip, 0xdead_0000);
        assert_eq!(ctx.rsp, 0x8000_fff0);
        assert_eq!(ctx.rflags, 0x202);
        assert_eq!(ctx.cs, 0x08);
        assert_eq!(ctx.ds, 0x10);
        assert_eq!(ctx.es, 0x10);
        assert_eq!(ctx.ss, 0x10);
        assert_eq!(ctx.fs, 0);
        assert_eq!(ctx.gs, 0);
        assert_eq!(ctx.cr3, 0x1000);
        assert_eq!(ctx.rax, 0);
        assert_eq!(ctx.r15, 0);
    }

    #[test]
    fn test_context_layout() {
        // 16 general registers, rip, rflags, six selectors, cr3.
        assert_eq!(core::mem::size_of::<ProcessContext>(), 25 * 8);
    }
}
