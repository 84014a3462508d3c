//! Introspection session: lifecycle and the per-dispatch pipeline.
//!
//! A `Session` owns every piece of mutable engine state. The host calls
//! [`Session::on_dispatch`] once per translated block; that one function runs
//! the three stages in order:
//!
//! 1. context-switch monitor (resolve the target on a new address space)
//! 2. target match oracle (is the active address space the target's?)
//! 3. execution hook dispatcher (log entered calls and observed returns)

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::event::TraceRecord;
use crate::layout::{KernelLayout, TASK_COMM_LEN};
use crate::memory::{GuestMemory, GuestReader};
use crate::monitor::{self, SwitchMonitor};
use crate::probe::{self, CallTracker, HookTable, PendingReturn, RegisterFile};
use crate::process::{ProcessLocator, ProcessRecord, TaskSummary};
use crate::sink::{LogSink, SinkOpener};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `init` has never been called.
    Uninitialized,
    /// Enabled, no `listen` yet.
    Idle,
    /// Listening; target not located yet.
    Resolving,
    /// Listening; target base known.
    Resolved,
    /// Stopped.
    Disabled,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Idle => "idle",
            SessionState::Resolving => "resolving",
            SessionState::Resolved => "resolved",
            SessionState::Disabled => "disabled",
        }
    }
}

/// Session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Process-list walks started.
    pub walks: u64,
    /// Records appended to the sink.
    pub records: u64,
    /// Records lost to sink errors.
    pub sink_errors: u64,
    /// Dispatch steps whose hook read failed.
    pub skipped_hooks: u64,
}

/// One introspection session over a guest.
pub struct Session<M, O: SinkOpener> {
    memory: M,
    opener: O,
    layout: KernelLayout,
    hooks: HookTable,

    initialized: bool,
    enabled: bool,
    target_name: Option<String>,
    target: Option<ProcessRecord>,
    monitor: SwitchMonitor,
    last_space_id: Option<u64>,
    calls: CallTracker,
    sink: Option<O::Sink>,
    stats: SessionStats,
}

impl<M: GuestMemory, O: SinkOpener> Session<M, O> {
    pub fn new(memory: M, opener: O, layout: KernelLayout, hooks: HookTable) -> Self {
        Self {
            memory,
            opener,
            layout,
            hooks,
            initialized: false,
            enabled: false,
            target_name: None,
            target: None,
            monitor: SwitchMonitor::new(),
            last_space_id: None,
            calls: CallTracker::new(),
            sink: None,
            stats: SessionStats::default(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Arm the engine. Calling it again only re-arms.
    pub fn init(&mut self) {
        if !self.enabled {
            log::info!("vmi: enabled");
        }
        self.initialized = true;
        self.enabled = true;
    }

    /// Start tracking `name`, logging to `path`.
    ///
    /// Fails without touching any state if the engine is disabled, the name
    /// does not fit the kernel's comm buffer, or the sink cannot be opened.
    /// On success the task list is searched once immediately.
    pub fn listen(&mut self, name: &str, path: &str) -> Result<SessionState> {
        if !self.enabled {
            return Err(Error::Disabled);
        }
        if name.len() > TASK_COMM_LEN {
            log::warn!("vmi listen: name '{}' longer than {} bytes", name, TASK_COMM_LEN);
            return Err(Error::NameTooLong { len: name.len() });
        }
        let sink = self.opener.open(path)?;

        self.release();
        self.target_name = Some(String::from(name));
        self.sink = Some(sink);
        log::info!("vmi listen: tracking '{}', log {}", name, path);

        self.try_resolve();
        Ok(self.state())
    }

    /// Disarm and release everything the session holds.
    pub fn stop(&mut self) {
        if !self.enabled {
            return;
        }
        self.release();
        self.enabled = false;
        log::info!("vmi: disabled");
    }

    /// Drop target, resolution, pending return and sink.
    fn release(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.flush() {
                log::warn!("vmi: flushing sink on release failed: {}", e);
            }
        }
        self.target_name = None;
        self.target = None;
        self.monitor.reset();
        self.calls.clear();
    }

    // =========================================================================
    // Dispatch pipeline
    // =========================================================================

    /// Run one dispatch step for `cpu_id`.
    ///
    /// `space_id` is the raw active address-space base register.
    pub fn on_dispatch<R>(&mut self, cpu_id: u32, pc: u64, space_id: u64, regs: &R)
    where
        R: RegisterFile + ?Sized,
    {
        if !self.enabled {
            return;
        }
        self.last_space_id = Some(space_id);

        if self.target.is_none() && self.target_name.is_some() && self.monitor.observe(space_id) {
            self.try_resolve();
        }

        if !self.target_active_in(space_id) {
            return;
        }

        let reader = GuestReader::new(&self.memory);
        match probe::dispatch(&mut self.hooks, &mut self.calls, &reader, cpu_id, pc, regs) {
            Ok(Some(record)) => self.emit(&record),
            Ok(None) => {}
            Err(e) => {
                self.stats.skipped_hooks += 1;
                log::debug!("vmi dispatch: cpu{} pc={:#x} skipped: {}", cpu_id, pc, e);
            }
        }
    }

    /// One locator pass for the current target name.
    fn try_resolve(&mut self) {
        let Some(name) = self.target_name.as_deref() else {
            return;
        };
        self.stats.walks += 1;

        let located = ProcessLocator::new(&self.memory, &self.layout).locate(name);
        match located {
            Ok(process) => {
                let record = TraceRecord::process_found(&process);
                self.target = Some(process);
                self.emit(&record);
            }
            Err(Error::NotFound) => {
                log::debug!("vmi: '{}' not in task list yet", name);
            }
            Err(e) => {
                log::debug!("vmi: task list walk aborted: {}", e);
            }
        }
    }

    fn emit(&mut self, record: &TraceRecord) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.append(record).and_then(|()| sink.flush()) {
            Ok(()) => self.stats.records += 1,
            Err(e) => {
                self.stats.sink_errors += 1;
                log::warn!("vmi: dropping record: {}", e);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the most recently dispatched address space is the target's.
    pub fn is_target_active(&self) -> bool {
        self.last_space_id
            .is_some_and(|space_id| self.target_active_in(space_id))
    }

    /// Whether `space_id` is the target's address space.
    pub fn target_active_in(&self, space_id: u64) -> bool {
        monitor::is_target_active(space_id, self.layout.base_mask, self.resolved_base())
    }

    pub fn state(&self) -> SessionState {
        if !self.initialized {
            SessionState::Uninitialized
        } else if !self.enabled {
            SessionState::Disabled
        } else if self.target.is_some() {
            SessionState::Resolved
        } else if self.target_name.is_some() {
            SessionState::Resolving
        } else {
            SessionState::Idle
        }
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn target(&self) -> Option<&ProcessRecord> {
        self.target.as_ref()
    }

    pub fn resolved_base(&self) -> Option<u64> {
        self.target.as_ref().map(|t| t.base)
    }

    pub fn pid(&self) -> Option<u32> {
        self.target.as_ref().map(|t| t.pid)
    }

    pub fn pending_return(&self) -> Option<&PendingReturn> {
        self.calls.pending()
    }

    /// Pending returns overwritten by a newer traced call.
    pub fn superseded_returns(&self) -> u64 {
        self.calls.dropped()
    }

    pub fn sink(&self) -> Option<&O::Sink> {
        self.sink.as_ref()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn layout(&self) -> &KernelLayout {
        &self.layout
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookTable {
        &mut self.hooks
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Snapshot of the guest task list.
    pub fn list_processes(&self) -> Result<Vec<TaskSummary>> {
        ProcessLocator::new(&self.memory, &self.layout).list()
    }
}
