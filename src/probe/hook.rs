//! Hook table: call-site addresses and the signatures traced at them.
//!
//! A signature fully describes what a handler extracts, so adding a traced
//! function is a table entry, not new dispatch logic.

use alloc::vec::Vec;
use hashbrown::HashMap;

/// Guest strings and buffers are cut at this many bytes.
pub const MAX_GUEST_STRING: usize = 256;

/// How a register value is interpreted and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// 32-bit signed integer (`int`); upper register bits are ignored.
    Int,
    /// 64-bit signed integer (`long`, `ssize_t`).
    Long,
    /// Unsigned size, decimal.
    Size,
    /// Flags, pointers and other values shown in hex.
    Hex,
    /// Pointer to a NUL-terminated guest string.
    CStr,
    /// Pointer to a buffer whose length is held in argument `len_arg`.
    Buf { len_arg: usize },
}

/// One argument slot; its register is its position in the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
}

const fn arg(name: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec { name, kind }
}

/// Traced function description.
#[derive(Debug, PartialEq, Eq)]
pub struct FunctionSig {
    pub name: &'static str,
    pub args: &'static [ArgSpec],
    /// Kind of the return value, `None` for functions that never return.
    pub ret: Option<ArgKind>,
}

impl FunctionSig {
    /// Whether entering this function arms the pending-return slot.
    pub fn traces_return(&self) -> bool {
        self.ret.is_some()
    }
}

// =============================================================================
// Built-in Signatures (libc, AArch64 glibc/musl)
// =============================================================================

pub static OPEN: FunctionSig = FunctionSig {
    name: "open",
    args: &[
        arg("path", ArgKind::CStr),
        arg("flags", ArgKind::Hex),
        arg("mode", ArgKind::Hex),
    ],
    ret: Some(ArgKind::Int),
};

pub static OPENAT: FunctionSig = FunctionSig {
    name: "openat",
    args: &[
        arg("dirfd", ArgKind::Int),
        arg("path", ArgKind::CStr),
        arg("flags", ArgKind::Hex),
        arg("mode", ArgKind::Hex),
    ],
    ret: Some(ArgKind::Int),
};

pub static READ: FunctionSig = FunctionSig {
    name: "read",
    args: &[
        arg("fd", ArgKind::Int),
        arg("buf", ArgKind::Hex),
        arg("count", ArgKind::Size),
    ],
    ret: Some(ArgKind::Long),
};

pub static WRITE: FunctionSig = FunctionSig {
    name: "write",
    args: &[
        arg("fd", ArgKind::Int),
        arg("buf", ArgKind::Buf { len_arg: 2 }),
        arg("count", ArgKind::Size),
    ],
    ret: Some(ArgKind::Long),
};

pub static CLOSE: FunctionSig = FunctionSig {
    name: "close",
    args: &[arg("fd", ArgKind::Int)],
    ret: Some(ArgKind::Int),
};

pub static EXECVE: FunctionSig = FunctionSig {
    name: "execve",
    args: &[
        arg("path", ArgKind::CStr),
        arg("argv", ArgKind::Hex),
        arg("envp", ArgKind::Hex),
    ],
    ret: Some(ArgKind::Int),
};

pub static PUTS: FunctionSig = FunctionSig {
    name: "puts",
    args: &[arg("s", ArgKind::CStr)],
    ret: Some(ArgKind::Int),
};

pub static EXIT: FunctionSig = FunctionSig {
    name: "exit",
    args: &[arg("status", ArgKind::Int)],
    ret: None,
};

pub static EXIT_IMMEDIATE: FunctionSig = FunctionSig {
    name: "_exit",
    args: &[arg("status", ArgKind::Int)],
    ret: None,
};

/// All built-in signatures.
pub static BUILTIN_SIGNATURES: &[&FunctionSig] = &[
    &OPEN,
    &OPENAT,
    &READ,
    &WRITE,
    &CLOSE,
    &EXECVE,
    &PUTS,
    &EXIT,
    &EXIT_IMMEDIATE,
];

/// Find a built-in signature by function name.
pub fn builtin(name: &str) -> Option<&'static FunctionSig> {
    BUILTIN_SIGNATURES.iter().copied().find(|sig| sig.name == name)
}

// =============================================================================
// Hook Table
// =============================================================================

/// A registered call-site hook.
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub addr: u64,
    pub sig: &'static FunctionSig,
    /// Number of times the call site was reached inside the target.
    pub hits: u64,
}

/// Mapping from call-site address to traced signature.
#[derive(Debug, Default)]
pub struct HookTable {
    hooks: HashMap<u64, HookEntry>,
}

impl HookTable {
    pub fn new() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }

    /// Build a table from `(address, signature)` pairs.
    pub fn from_entries<I>(entries: I) -> Result<Self, &'static str>
    where
        I: IntoIterator<Item = (u64, &'static FunctionSig)>,
    {
        let mut table = Self::new();
        for (addr, sig) in entries {
            table.register(addr, sig)?;
        }
        Ok(table)
    }

    /// Register a hook at `addr`.
    pub fn register(&mut self, addr: u64, sig: &'static FunctionSig) -> Result<(), &'static str> {
        if self.hooks.contains_key(&addr) {
            return Err("hook already registered at this address");
        }
        self.hooks.insert(addr, HookEntry { addr, sig, hits: 0 });
        log::info!("vmi hook: registered {} at {:#x}", sig.name, addr);
        Ok(())
    }

    /// Remove the hook at `addr`.
    pub fn unregister(&mut self, addr: u64) -> Result<&'static FunctionSig, &'static str> {
        let entry = self.hooks.remove(&addr).ok_or("hook not found")?;
        log::info!("vmi hook: unregistered {} at {:#x}", entry.sig.name, addr);
        Ok(entry.sig)
    }

    pub fn lookup(&self, pc: u64) -> Option<&HookEntry> {
        self.hooks.get(&pc)
    }

    /// Record a hit.
    pub fn record_hit(&mut self, pc: u64) {
        if let Some(entry) = self.hooks.get_mut(&pc) {
            entry.hits += 1;
        }
    }

    pub fn reset_hits(&mut self) {
        for entry in self.hooks.values_mut() {
            entry.hits = 0;
        }
    }

    /// List all hooks ordered by address.
    pub fn list(&self) -> Vec<&HookEntry> {
        let mut entries: Vec<&HookEntry> = self.hooks.values().collect();
        entries.sort_by_key(|e| e.addr);
        entries
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
