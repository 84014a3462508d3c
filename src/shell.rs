//! Control-surface commands.
//!
//! The emulator's monitor forwards user input here, e.g.
//!
//! ```text
//! vmi init
//! vmi listen target /tmp/target.log
//! vmi hook add 0x4005c0 open
//! vmi status
//! vmi stop
//! ```

use alloc::string::{String, ToString};
use core::fmt::Write;

use crate::error::Error;
use crate::memory::GuestMemory;
use crate::probe::hook;
use crate::session::Session;
use crate::sink::SinkOpener;

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init,
    Listen { name: String, path: String },
    Stop,
    Status,
    /// List the guest task list.
    Ps,
    /// List registered hooks.
    Hooks,
    HookAdd { addr: u64, function: String },
    HookDel { addr: u64 },
}

/// Error types for command handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Empty input.
    Empty,
    /// Unknown command word.
    Unknown(String),
    /// Wrong arguments; carries the expected usage.
    Usage(&'static str),
    /// Address argument is not a number.
    BadAddress(String),
    /// No built-in signature with that name.
    UnknownFunction(String),
    /// Hook table rejected the change.
    Hook(&'static str),
    /// Engine operation failed.
    Engine(Error),
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "No command given"),
            Self::Unknown(cmd) => write!(f, "Unknown command: {}", cmd),
            Self::Usage(usage) => write!(f, "Usage: {}", usage),
            Self::BadAddress(arg) => write!(f, "Invalid address: {}", arg),
            Self::UnknownFunction(name) => write!(f, "No built-in signature for: {}", name),
            Self::Hook(msg) => write!(f, "Hook error: {}", msg),
            Self::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl core::error::Error for CommandError {}

impl From<Error> for CommandError {
    fn from(e: Error) -> Self {
        Self::Engine(e)
    }
}

fn parse_addr(arg: &str) -> Result<u64, CommandError> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => arg.parse::<u64>(),
    };
    parsed.map_err(|_| CommandError::BadAddress(arg.to_string()))
}

impl Command {
    /// Parse one command line. A leading `vmi` word is optional.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace().peekable();
        if words.peek() == Some(&"vmi") {
            words.next();
        }
        let cmd = words.next().ok_or(CommandError::Empty)?;
        let args: alloc::vec::Vec<&str> = words.collect();

        match (cmd, args.as_slice()) {
            ("init", []) => Ok(Command::Init),
            ("listen", [name, path]) => Ok(Command::Listen {
                name: name.to_string(),
                path: path.to_string(),
            }),
            ("listen", _) => Err(CommandError::Usage("listen <process> <log-path>")),
            ("stop", []) => Ok(Command::Stop),
            ("status", []) => Ok(Command::Status),
            ("ps", []) => Ok(Command::Ps),
            ("hooks", []) => Ok(Command::Hooks),
            ("hook", ["add", addr, function]) => Ok(Command::HookAdd {
                addr: parse_addr(addr)?,
                function: function.to_string(),
            }),
            ("hook", ["del", addr]) => Ok(Command::HookDel {
                addr: parse_addr(addr)?,
            }),
            ("hook", _) => Err(CommandError::Usage("hook add <addr> <function> | hook del <addr>")),
            ("init" | "stop" | "status" | "ps" | "hooks", _) => {
                Err(CommandError::Usage("command takes no arguments"))
            }
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Execute against `session`, returning text for the user.
    pub fn execute<M, O>(&self, session: &mut Session<M, O>) -> Result<String, CommandError>
    where
        M: GuestMemory,
        O: SinkOpener,
    {
        let mut out = String::new();
        match self {
            Command::Init => {
                session.init();
                out.push_str("vmi enabled");
            }
            Command::Listen { name, path } => {
                let state = session.listen(name, path)?;
                let _ = write!(out, "listening for '{}' ({})", name, state.label());
                if let Some(t) = session.target() {
                    let _ = write!(out, ": pid={} base={:#x}", t.pid, t.base);
                }
            }
            Command::Stop => {
                session.stop();
                out.push_str("vmi disabled");
            }
            Command::Status => {
                let stats = session.stats();
                let _ = writeln!(out, "state:   {}", session.state().label());
                let _ = writeln!(out, "target:  {}", session.target_name().unwrap_or("-"));
                match session.target() {
                    Some(t) => {
                        let _ = writeln!(out, "pid:     {}", t.pid);
                        let _ = writeln!(out, "base:    {:#x}", t.base);
                    }
                    None => {
                        let _ = writeln!(out, "pid:     -");
                        let _ = writeln!(out, "base:    -");
                    }
                }
                match session.pending_return() {
                    Some(p) => {
                        let _ = writeln!(out, "pending: {} -> {:#x}", p.function, p.addr);
                    }
                    None => {
                        let _ = writeln!(out, "pending: -");
                    }
                }
                let _ = write!(
                    out,
                    "walks={} records={} sink_errors={} skipped={}",
                    stats.walks, stats.records, stats.sink_errors, stats.skipped_hooks
                );
            }
            Command::Ps => {
                let tasks = session.list_processes()?;
                let _ = write!(out, "{:>7} {:<16} {:>18}", "PID", "COMM", "TASK");
                for t in tasks {
                    let comm = if t.has_mm { t.name } else { alloc::format!("[{}]", t.name) };
                    let _ = write!(out, "\n{:>7} {:<16} {:>#18x}", t.pid, comm, t.node);
                }
            }
            Command::Hooks => {
                let _ = write!(out, "{:>18} {:<10} {:>8}", "ADDR", "FUNC", "HITS");
                for h in session.hooks().list() {
                    let _ = write!(out, "\n{:>#18x} {:<10} {:>8}", h.addr, h.sig.name, h.hits);
                }
            }
            Command::HookAdd { addr, function } => {
                let sig = hook::builtin(function)
                    .ok_or_else(|| CommandError::UnknownFunction(function.clone()))?;
                session
                    .hooks_mut()
                    .register(*addr, sig)
                    .map_err(CommandError::Hook)?;
                let _ = write!(out, "hooked {} at {:#x}", sig.name, addr);
            }
            Command::HookDel { addr } => {
                let sig = session
                    .hooks_mut()
                    .unregister(*addr)
                    .map_err(CommandError::Hook)?;
                let _ = write!(out, "removed {} at {:#x}", sig.name, addr);
            }
        }
        Ok(out)
    }
}

/// Parse and execute one command line.
pub fn run<M, O>(session: &mut Session<M, O>, line: &str) -> Result<String, CommandError>
where
    M: GuestMemory,
    O: SinkOpener,
{
    Command::parse(line)?.execute(session)
}
