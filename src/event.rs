//! Trace record format.
//!
//! Every line written to a log sink is one `TraceRecord`: a located target,
//! an entered call, or an observed return. Records render as a single
//! human-readable line:
//!
//! ```text
//! [vmi] kind=call_entry ts_ns=1000 cpu=0 pc=0x400580 func=open path="/etc/passwd" flags=0x0 mode=0
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::platform;
use crate::process::ProcessRecord;

/// Record kind.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// The target process was found in the guest task list.
    ProcessFound = 0,
    /// A traced call site was reached.
    CallEntry = 1,
    /// A pending return address was reached.
    CallReturn = 2,
}

impl RecordKind {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::ProcessFound => "process_found",
            RecordKind::CallEntry => "call_entry",
            RecordKind::CallReturn => "call_return",
        }
    }
}

/// Value of a named record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Rendered in decimal.
    Dec(u64),
    /// Rendered in hex.
    Hex(u64),
    /// Signed, for return values.
    Signed(i64),
    /// Guest string, already escaped. `truncated` appends `...`.
    Str { text: String, truncated: bool },
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Dec(v) => write!(f, "{}", v),
            FieldValue::Hex(v) => write!(f, "{:#x}", v),
            FieldValue::Signed(v) => write!(f, "{}", v),
            FieldValue::Str { text, truncated } => {
                write!(f, "\"{}\"", text)?;
                if *truncated {
                    write!(f, "...")?;
                }
                Ok(())
            }
        }
    }
}

/// One structured trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub kind: RecordKind,
    /// Monotonic timestamp in nanoseconds.
    pub timestamp_ns: u64,
    pub cpu_id: Option<u32>,
    pub pc: Option<u64>,
    pub function: Option<&'static str>,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl TraceRecord {
    /// Create a new record with the timestamp pre-filled.
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            timestamp_ns: platform::time_ns(),
            cpu_id: None,
            pc: None,
            function: None,
            fields: Vec::new(),
        }
    }

    /// Record for a freshly located target process.
    pub fn process_found(process: &ProcessRecord) -> Self {
        Self::new(RecordKind::ProcessFound)
            .with_field("name", FieldValue::Str {
                text: escape_guest_bytes(process.name.as_bytes()),
                truncated: false,
            })
            .with_field("pid", FieldValue::Dec(process.pid as u64))
            .with_field("base", FieldValue::Hex(process.base))
    }

    pub fn with_cpu(mut self, cpu_id: u32) -> Self {
        self.cpu_id = Some(cpu_id);
        self
    }

    pub fn with_pc(mut self, pc: u64) -> Self {
        self.pc = Some(pc);
        self
    }

    pub fn with_function(mut self, name: &'static str) -> Self {
        self.function = Some(name);
        self
    }

    pub fn with_field(mut self, name: &'static str, value: FieldValue) -> Self {
        self.fields.push((name, value));
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[vmi] kind={} ts_ns={}", self.kind.label(), self.timestamp_ns)?;
        if let Some(cpu) = self.cpu_id {
            write!(f, " cpu={}", cpu)?;
        }
        if let Some(pc) = self.pc {
            write!(f, " pc={:#x}", pc)?;
        }
        if let Some(func) = self.function {
            write!(f, " func={}", func)?;
        }
        for (name, value) in &self.fields {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}

/// Render guest bytes with control and non-ASCII characters escaped.
///
/// Newline becomes the two characters `\n`; quotes and backslashes are
/// escaped so a rendered string always stays on one line.
pub fn escape_guest_bytes(bytes: &[u8]) -> String {
    use core::fmt::Write;

    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn escape_control_characters() {
        assert_eq!(escape_guest_bytes(b"a\nb"), "a\\nb");
        assert_eq!(escape_guest_bytes(b"tab\there"), "tab\\there");
        assert_eq!(escape_guest_bytes(b"q\"uote\\"), "q\\\"uote\\\\");
        assert_eq!(escape_guest_bytes(&[0x01, 0xff]), "\\x01\\xff");
        assert_eq!(escape_guest_bytes(b"plain text"), "plain text");
    }

    #[test]
    fn record_line_format() {
        let rec = TraceRecord::new(RecordKind::CallEntry)
            .with_cpu(1)
            .with_pc(0x400580)
            .with_function("open")
            .with_field("path", FieldValue::Str {
                text: escape_guest_bytes(b"/tmp/x"),
                truncated: false,
            })
            .with_field("flags", FieldValue::Hex(0x241));
        let expected = alloc::format!(
            "[vmi] kind=call_entry ts_ns={} cpu=1 pc=0x400580 func=open path=\"/tmp/x\" flags=0x241",
            rec.timestamp_ns
        );
        assert_eq!(rec.to_string(), expected);
    }

    #[test]
    fn process_found_record_carries_name_pid_base() {
        let rec = TraceRecord::process_found(&ProcessRecord {
            node: 0xffff_0000_0010_0000,
            name: "target".to_string(),
            pid: 77,
            base: 0x1000,
        });
        assert_eq!(rec.kind, RecordKind::ProcessFound);
        assert_eq!(rec.field("pid"), Some(&FieldValue::Dec(77)));
        assert_eq!(rec.field("base"), Some(&FieldValue::Hex(0x1000)));
        assert!(rec.to_string().contains("name=\"target\""));
    }

    #[test]
    fn truncated_string_is_marked() {
        let v = FieldValue::Str {
            text: "abc".to_string(),
            truncated: true,
        };
        assert_eq!(v.to_string(), "\"abc\"...");
    }
}
