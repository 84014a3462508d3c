//! Append-only destinations for trace records.
//!
//! A session owns exactly one sink at a time, opened by its `SinkOpener`
//! when `listen` is called and flushed after every record.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{Error, Result};
use crate::event::TraceRecord;

/// Append-only record stream.
pub trait LogSink {
    fn append(&mut self, record: &TraceRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Opens a sink for a destination path.
pub trait SinkOpener {
    type Sink: LogSink;

    fn open(&mut self, path: &str) -> Result<Self::Sink>;
}

// =============================================================================
// In-memory sink
// =============================================================================

/// Sink appending rendered lines to a shared buffer.
///
/// The buffer outlives the sink, so lines stay readable after `stop`.
#[derive(Debug, Clone)]
pub struct MemorySink {
    path: String,
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, record: &TraceRecord) -> Result<()> {
        self.lines.lock().push(record.to_string());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Hands out `MemorySink`s that all write to one buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkOpener {
    lines: Arc<Mutex<Vec<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MemorySinkOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Paths opened so far, in order.
    pub fn opened_paths(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl SinkOpener for MemorySinkOpener {
    type Sink = MemorySink;

    fn open(&mut self, path: &str) -> Result<MemorySink> {
        if path.is_empty() {
            return Err(Error::SinkUnavailable(String::new()));
        }
        self.opened.lock().push(path.to_string());
        Ok(MemorySink {
            path: path.to_string(),
            lines: self.lines.clone(),
        })
    }
}

// =============================================================================
// File sink (std)
// =============================================================================

#[cfg(feature = "std")]
pub use file::{FileSink, FileSinkOpener};

#[cfg(feature = "std")]
mod file {
    use std::fs::{File, OpenOptions};
    use std::io::{BufWriter, Write};

    use alloc::string::{String, ToString};

    use super::{LogSink, SinkOpener};
    use crate::error::{Error, Result};
    use crate::event::TraceRecord;

    /// Host file opened in append mode.
    pub struct FileSink {
        path: String,
        writer: BufWriter<File>,
    }

    impl FileSink {
        pub fn open(path: &str) -> Result<Self> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    log::warn!("vmi sink: cannot open {}: {}", path, e);
                    Error::SinkUnavailable(path.to_string())
                })?;
            Ok(Self {
                path: path.to_string(),
                writer: BufWriter::new(file),
            })
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl LogSink for FileSink {
        fn append(&mut self, record: &TraceRecord) -> Result<()> {
            writeln!(self.writer, "{}", record).map_err(|e| Error::SinkWrite(e.to_string()))
        }

        fn flush(&mut self) -> Result<()> {
            self.writer
                .flush()
                .map_err(|e| Error::SinkWrite(e.to_string()))
        }
    }

    /// Opens `FileSink`s on the host filesystem.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FileSinkOpener;

    impl SinkOpener for FileSinkOpener {
        type Sink = FileSink;

        fn open(&mut self, path: &str) -> Result<FileSink> {
            FileSink::open(path)
        }
    }
}
