//! Error types shared by the introspection engine.

use alloc::string::String;

/// Error types for introspection and tracing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A guest memory read failed (page not present, invalid address).
    Unreadable {
        /// Guest virtual address of the failed read.
        addr: u64,
        /// Number of bytes requested.
        len: usize,
    },
    /// Target process name exceeds the kernel's comm buffer.
    NameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
    },
    /// The process list was fully traversed without a match.
    NotFound,
    /// The log destination could not be opened.
    SinkUnavailable(String),
    /// Appending to or flushing the log destination failed.
    SinkWrite(String),
    /// The engine is not enabled.
    Disabled,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unreadable { addr, len } => {
                write!(f, "Guest memory unreadable: {} bytes at {:#x}", len, addr)
            }
            Self::NameTooLong { len } => write!(
                f,
                "Process name too long: {} bytes (max {})",
                len,
                crate::layout::TASK_COMM_LEN
            ),
            Self::NotFound => write!(f, "Process not found in guest task list"),
            Self::SinkUnavailable(path) => write!(f, "Cannot open log sink: {}", path),
            Self::SinkWrite(msg) => write!(f, "Log sink write failed: {}", msg),
            Self::Disabled => write!(f, "Introspection engine is not enabled"),
        }
    }
}

impl core::error::Error for Error {}

/// Result alias for engine operations.
pub type Result<T> = core::result::Result<T, Error>;
