//! Execution hook dispatcher.
//!
//! Runs once per dispatch step while the target address space is active.
//! Returns are matched by address against a single pending slot: entering a
//! traced call overwrites whatever return was pending, so with nested or
//! interleaved traced calls only the most recently entered call's return is
//! reported.

use crate::error::Result;
use crate::event::{FieldValue, RecordKind, TraceRecord, escape_guest_bytes};
use crate::memory::{GuestMemory, GuestReader};

use super::hook::{ArgKind, HookTable, MAX_GUEST_STRING};
use super::regs::RegisterFile;

/// The single return site being watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReturn {
    /// Link-register value captured at call entry.
    pub addr: u64,
    /// Function whose return this is.
    pub function: &'static str,
    pub ret: ArgKind,
}

/// Owner of the pending-return slot.
#[derive(Debug, Default, Clone)]
pub struct CallTracker {
    pending: Option<PendingReturn>,
    /// Pending returns overwritten before they fired.
    dropped: u64,
}

impl CallTracker {
    pub const fn new() -> Self {
        Self {
            pending: None,
            dropped: 0,
        }
    }

    pub fn pending(&self) -> Option<&PendingReturn> {
        self.pending.as_ref()
    }

    pub fn pending_addr(&self) -> Option<u64> {
        self.pending.map(|p| p.addr)
    }

    /// Arm the slot, replacing any earlier pending return.
    pub fn arm(&mut self, pending: PendingReturn) {
        if let Some(prev) = self.pending.replace(pending) {
            self.dropped += 1;
            log::debug!(
                "vmi dispatch: {} return at {:#x} superseded by {}",
                prev.function,
                prev.addr,
                pending.function
            );
        }
    }

    /// Take the pending return if `pc` is its address.
    pub fn take_if_reached(&mut self, pc: u64) -> Option<PendingReturn> {
        match self.pending {
            Some(p) if p.addr == pc => self.pending.take(),
            _ => None,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// Interpret one register value according to `kind`.
///
/// `regs` is consulted for buffer lengths; string kinds read guest memory.
pub fn extract_value<M, R>(
    reader: &GuestReader<'_, M>,
    regs: &R,
    kind: ArgKind,
    raw: u64,
) -> Result<FieldValue>
where
    M: GuestMemory + ?Sized,
    R: RegisterFile + ?Sized,
{
    let value = match kind {
        ArgKind::Int => FieldValue::Signed(raw as u32 as i32 as i64),
        ArgKind::Long => FieldValue::Signed(raw as i64),
        ArgKind::Size => FieldValue::Dec(raw),
        ArgKind::Hex => FieldValue::Hex(raw),
        ArgKind::CStr => {
            let (bytes, truncated) = reader.read_c_string(raw, MAX_GUEST_STRING)?;
            FieldValue::Str {
                text: escape_guest_bytes(&bytes),
                truncated,
            }
        }
        ArgKind::Buf { len_arg } => {
            let len = regs.arg(len_arg);
            let (bytes, truncated) = reader.read_buffer(raw, len, MAX_GUEST_STRING)?;
            FieldValue::Str {
                text: escape_guest_bytes(&bytes),
                truncated,
            }
        }
    };
    Ok(value)
}

/// Handle one dispatch step at `pc`.
///
/// Returns the record to log, if any. On a failed argument read nothing is
/// logged and the pending slot is left as it was.
pub fn dispatch<M, R>(
    hooks: &mut HookTable,
    tracker: &mut CallTracker,
    reader: &GuestReader<'_, M>,
    cpu_id: u32,
    pc: u64,
    regs: &R,
) -> Result<Option<TraceRecord>>
where
    M: GuestMemory + ?Sized,
    R: RegisterFile + ?Sized,
{
    if let Some(pending) = tracker.pending().filter(|p| p.addr == pc).copied() {
        let ret = extract_value(reader, regs, pending.ret, regs.return_value())?;
        tracker.take_if_reached(pc);
        log::debug!(
            "vmi dispatch: cpu{} {} returned at {:#x}",
            cpu_id,
            pending.function,
            pc
        );
        let record = TraceRecord::new(RecordKind::CallReturn)
            .with_cpu(cpu_id)
            .with_pc(pc)
            .with_function(pending.function)
            .with_field("ret", ret);
        return Ok(Some(record));
    }

    let Some(sig) = hooks.lookup(pc).map(|entry| entry.sig) else {
        return Ok(None);
    };
    hooks.record_hit(pc);

    let mut record = TraceRecord::new(RecordKind::CallEntry)
        .with_cpu(cpu_id)
        .with_pc(pc)
        .with_function(sig.name);
    for (idx, spec) in sig.args.iter().enumerate() {
        let value = extract_value(reader, regs, spec.kind, regs.arg(idx))?;
        record = record.with_field(spec.name, value);
    }

    if let Some(ret) = sig.ret {
        tracker.arm(PendingReturn {
            addr: regs.link_register(),
            function: sig.name,
            ret,
        });
    }

    log::debug!("vmi dispatch: cpu{} entered {} at {:#x}", cpu_id, sig.name, pc);
    Ok(Some(record))
}
