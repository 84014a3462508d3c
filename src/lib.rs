//! AxVisor guest process introspection
//!
//! Locates a named process inside a running Linux guest by walking the
//! kernel task list, tracks it across context switches, and logs calls made
//! at registered call sites together with their arguments and return values.
//!
//! # Features
//!
//! - `std` - host file sink and host monotonic clock (default)
//!
//! # Quick Start
//!
//! ```ignore
//! use axvmi::{HookTable, KernelLayout, Session};
//! use axvmi::layout::{MmOffsets, TaskOffsets, DEFAULT_BASE_MASK};
//! use axvmi::sink::FileSinkOpener;
//!
//! let layout = KernelLayout::new(
//!     INIT_TASK,
//!     TaskOffsets { comm: 0x5c8, tasks: 0x3a0, mm: 0x3f0, pid: 0x4e8 },
//!     MmOffsets { pgd: 0x48 },
//!     LINEAR_MAP_OFFSET,
//!     DEFAULT_BASE_MASK,
//! );
//! let mut hooks = HookTable::new();
//! hooks.register(0x4005c0, &axvmi::probe::hook::OPEN).unwrap();
//!
//! let mut session = Session::new(guest_memory, FileSinkOpener, layout, hooks);
//! session.init();
//! session.listen("target", "/tmp/target.log")?;
//!
//! // From the emulator's per-block hook:
//! session.on_dispatch(cpu_id, pc, ttbr0, &regs);
//! ```

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// Platform Abstraction (for testing support)
// =============================================================================

pub mod platform;

// =============================================================================
// Guest Access
// =============================================================================

pub mod error;
pub mod layout;
pub mod memory;
pub mod process;

// =============================================================================
// Tracing Pipeline
// =============================================================================

pub mod event;
pub mod monitor;
pub mod probe;
pub mod sink;

// =============================================================================
// Session and Control Surface
// =============================================================================

pub mod session;
pub mod shared;
pub mod shell;

pub use error::Error as VmiError;
pub use event::{FieldValue, RecordKind, TraceRecord};
pub use layout::KernelLayout;
pub use memory::{GuestMemory, GuestReader, SparseMemory};
pub use probe::{Aarch64Regs, HookTable, RegisterFile};
pub use process::{ProcessLocator, ProcessRecord};
pub use session::{Session, SessionState, SessionStats};
pub use shared::SharedSession;
