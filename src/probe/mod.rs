//! Call-site probing for the target process.
//!
//! - `regs`: calling-convention view of the guest register file
//! - `hook`: call-site address → traced function signature
//! - `dispatch`: per-step entry/return recognition and argument extraction

pub mod dispatch;
pub mod hook;
pub mod regs;

pub use dispatch::{CallTracker, PendingReturn, dispatch};
pub use hook::{ArgKind, ArgSpec, FunctionSig, HookEntry, HookTable};
pub use regs::{Aarch64Regs, RegisterFile};
