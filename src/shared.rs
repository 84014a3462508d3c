//! Session shared between emulator CPU threads.
//!
//! The engine assumes one dispatch step at a time. Hosts that run several
//! vCPU threads route every call through this single lock.

use alloc::vec::Vec;
use spin::Mutex;

use crate::error::Result;
use crate::memory::GuestMemory;
use crate::probe::RegisterFile;
use crate::process::TaskSummary;
use crate::session::{Session, SessionState};
use crate::sink::SinkOpener;

/// A `Session` behind a spin lock.
pub struct SharedSession<M, O: SinkOpener> {
    inner: Mutex<Session<M, O>>,
}

impl<M: GuestMemory, O: SinkOpener> SharedSession<M, O> {
    pub fn new(session: Session<M, O>) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    pub fn init(&self) {
        self.inner.lock().init();
    }

    pub fn listen(&self, name: &str, path: &str) -> Result<SessionState> {
        self.inner.lock().listen(name, path)
    }

    pub fn stop(&self) {
        self.inner.lock().stop();
    }

    pub fn on_dispatch<R>(&self, cpu_id: u32, pc: u64, space_id: u64, regs: &R)
    where
        R: RegisterFile + ?Sized,
    {
        self.inner.lock().on_dispatch(cpu_id, pc, space_id, regs);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().is_enabled()
    }

    pub fn is_target_active(&self) -> bool {
        self.inner.lock().is_target_active()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    pub fn list_processes(&self) -> Result<Vec<TaskSummary>> {
        self.inner.lock().list_processes()
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<T>(&self, f: impl FnOnce(&mut Session<M, O>) -> T) -> T {
        let mut session = self.inner.lock();
        f(&mut session)
    }

    pub fn into_inner(self) -> Session<M, O> {
        self.inner.into_inner()
    }
}
