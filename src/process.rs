//! Guest process locator.
//!
//! Walks the guest kernel's circular task list from `init_task`, reading each
//! `task_struct` field-by-field through the offsets in [`KernelLayout`].
//!
//! The list lives in guest memory that may change under us, so the walk is
//! bounded three ways:
//! - it ends when the next node is the anchor again (full traversal);
//! - a node linking to itself ends the walk as if it had reached the anchor;
//! - no more than `max_tasks` nodes are visited.
//!
//! Any failed read aborts the walk; a partially resolved base is never
//! returned.

use alloc::string::String;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::layout::{KernelLayout, TASK_COMM_LEN};
use crate::memory::{GuestMemory, GuestReader};

/// A located process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Address of the process's `task_struct`.
    pub node: u64,
    pub name: String,
    pub pid: u32,
    /// Page-table base, comparable with the masked base register.
    pub base: u64,
}

/// One entry of a full task-list listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub node: u64,
    pub name: String,
    pub pid: u32,
    /// False for kernel threads (`mm == NULL`).
    pub has_mm: bool,
}

/// View of a single `task_struct` in guest memory.
///
/// Nothing is cached: each accessor performs its own read.
pub struct TaskView<'r, 'a, M: ?Sized> {
    reader: &'r GuestReader<'a, M>,
    layout: &'r KernelLayout,
    node: u64,
}

impl<'r, 'a, M: GuestMemory + ?Sized> TaskView<'r, 'a, M> {
    pub fn node(&self) -> u64 {
        self.node
    }

    fn field(&self, offset: usize) -> u64 {
        self.node.wrapping_add(offset as u64)
    }

    /// Raw `comm` buffer.
    pub fn comm(&self) -> Result<[u8; TASK_COMM_LEN]> {
        self.reader.read_array(self.field(self.layout.task.comm))
    }

    pub fn pid(&self) -> Result<u32> {
        self.reader.read_u32(self.field(self.layout.task.pid))
    }

    pub fn mm(&self) -> Result<u64> {
        self.reader.read_ptr(self.field(self.layout.task.mm))
    }

    /// Base address of the next task in the list.
    pub fn next_node(&self) -> Result<u64> {
        let link = self.reader.read_ptr(self.field(self.layout.task.tasks))?;
        Ok(self.layout.node_from_link(link))
    }

    /// Page-table base of the memory descriptor `mm`.
    pub fn page_table_base(&self, mm: u64) -> Result<u64> {
        let pgd = self
            .reader
            .read_ptr(mm.wrapping_add(self.layout.mm.pgd as u64))?;
        Ok(self.layout.pgd_to_base(pgd))
    }
}

/// Length of a NUL-terminated `comm` buffer.
fn comm_len(comm: &[u8]) -> usize {
    comm.iter().position(|&b| b == 0).unwrap_or(comm.len())
}

/// Compare a `comm` buffer with a process name, NUL-terminated.
pub fn comm_matches(comm: &[u8], name: &str) -> bool {
    &comm[..comm_len(comm)] == name.as_bytes()
}

/// Render a `comm` buffer for display.
pub fn comm_to_string(comm: &[u8]) -> String {
    String::from_utf8_lossy(&comm[..comm_len(comm)]).into_owned()
}

/// Locates processes by walking the guest task list.
pub struct ProcessLocator<'a, M: ?Sized> {
    reader: GuestReader<'a, M>,
    layout: &'a KernelLayout,
}

impl<'a, M: GuestMemory + ?Sized> ProcessLocator<'a, M> {
    pub fn new(mem: &'a M, layout: &'a KernelLayout) -> Self {
        Self {
            reader: GuestReader::new(mem),
            layout,
        }
    }

    /// Visit every task in list order, starting at the anchor.
    ///
    /// `visit` may stop the walk early with `ControlFlow::Break`.
    pub fn walk<T, F>(&self, mut visit: F) -> Result<Option<T>>
    where
        F: FnMut(&TaskView<'_, 'a, M>) -> Result<ControlFlow<T>>,
    {
        let anchor = self.layout.init_task;
        let mut node = anchor;
        let mut visited = 0usize;

        loop {
            let view = TaskView {
                reader: &self.reader,
                layout: self.layout,
                node,
            };
            if let ControlFlow::Break(found) = visit(&view)? {
                return Ok(Some(found));
            }
            visited += 1;

            let next = view.next_node()?;
            if next == node {
                log::warn!(
                    "process walk: task {:#x} links to itself, restarting at anchor",
                    node
                );
                return Ok(None);
            }
            if next == anchor {
                return Ok(None);
            }
            if visited >= self.layout.max_tasks {
                log::warn!(
                    "process walk: {} tasks visited without returning to anchor {:#x}",
                    visited,
                    anchor
                );
                return Ok(None);
            }
            node = next;
        }
    }

    /// Resolve `name` to its pid and page-table base.
    pub fn locate(&self, name: &str) -> Result<ProcessRecord> {
        if name.len() > TASK_COMM_LEN {
            return Err(Error::NameTooLong { len: name.len() });
        }

        let found = self.walk(|task| {
            let comm = task.comm()?;
            if !comm_matches(&comm, name) {
                return Ok(ControlFlow::Continue(()));
            }

            let mm = task.mm()?;
            if mm == 0 {
                log::debug!(
                    "process walk: '{}' at {:#x} is a kernel thread, skipping",
                    name,
                    task.node()
                );
                return Ok(ControlFlow::Continue(()));
            }

            let pid = task.pid()?;
            let base = task.page_table_base(mm)?;
            Ok(ControlFlow::Break(ProcessRecord {
                node: task.node(),
                name: String::from(name),
                pid,
                base,
            }))
        })?;

        match found {
            Some(record) => {
                log::info!(
                    "process '{}' located: pid={} base={:#x} task={:#x}",
                    record.name,
                    record.pid,
                    record.base,
                    record.node
                );
                Ok(record)
            }
            None => Err(Error::NotFound),
        }
    }

    /// List every task reachable from the anchor.
    pub fn list(&self) -> Result<Vec<TaskSummary>> {
        let mut tasks = Vec::new();
        self.walk::<(), _>(|task| {
            let comm = task.comm()?;
            tasks.push(TaskSummary {
                node: task.node(),
                name: comm_to_string(&comm),
                pid: task.pid()?,
                has_mm: task.mm()? != 0,
            });
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_match_is_nul_terminated() {
        let mut comm = [0u8; TASK_COMM_LEN];
        comm[..5].copy_from_slice(b"shell");
        comm[6] = b'x';
        assert!(comm_matches(&comm, "shell"));
        assert!(!comm_matches(&comm, "shel"));
        assert!(!comm_matches(&comm, "shellx"));
    }

    #[test]
    fn comm_match_full_width_name() {
        let comm = *b"abcdefghijklmnop";
        assert!(comm_matches(&comm, "abcdefghijklmnop"));
        assert_eq!(comm_to_string(&comm), "abcdefghijklmnop");
    }
}
