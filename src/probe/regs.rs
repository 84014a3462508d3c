//! Guest register file access.
//!
//! Handlers only need the calling convention's view of the CPU: argument
//! registers, the link register and the return-value register.

/// Calling-convention view of a guest register file.
pub trait RegisterFile {
    /// Value of argument register `idx` (0-based), or 0 past the last one.
    fn arg(&self, idx: usize) -> u64;

    /// Return address of the current call.
    fn link_register(&self) -> u64;

    /// Register holding a function's return value.
    fn return_value(&self) -> u64;
}

/// Number of argument registers in the AArch64 procedure call standard.
pub const AARCH64_ARG_REGS: usize = 8;

/// AArch64 general-purpose register snapshot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aarch64Regs {
    /// x0..x30; x30 is the link register.
    pub x: [u64; 31],
    pub sp: u64,
}

impl Aarch64Regs {
    /// Snapshot with the given argument registers and link register set.
    pub fn with_call(args: &[u64], lr: u64) -> Self {
        let mut regs = Self::default();
        for (slot, &val) in regs.x.iter_mut().zip(args.iter().take(AARCH64_ARG_REGS)) {
            *slot = val;
        }
        regs.x[30] = lr;
        regs
    }

    /// Snapshot with only the return-value register set.
    pub fn with_return(value: u64) -> Self {
        let mut regs = Self::default();
        regs.x[0] = value;
        regs
    }
}

impl RegisterFile for Aarch64Regs {
    fn arg(&self, idx: usize) -> u64 {
        if idx < AARCH64_ARG_REGS { self.x[idx] } else { 0 }
    }

    fn link_register(&self) -> u64 {
        self.x[30]
    }

    fn return_value(&self) -> u64 {
        self.x[0]
    }
}
