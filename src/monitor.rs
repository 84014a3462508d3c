//! Context-switch detection and target matching.
//!
//! Both checks run on every dispatch step, so they are plain comparisons with
//! no guest memory access.

/// Whether the active base register differs from the last observed value.
///
/// No previous observation counts as a change.
#[inline]
pub fn space_changed(prev: Option<u64>, active: u64) -> bool {
    prev != Some(active)
}

/// Whether the CPU is executing in the target's address space.
#[inline]
pub fn is_target_active(space_id: u64, base_mask: u64, resolved_base: Option<u64>) -> bool {
    match resolved_base {
        Some(base) => space_id & base_mask == base,
        None => false,
    }
}

/// Tracks the last observed address space while the target is unresolved.
#[derive(Debug, Default, Clone)]
pub struct SwitchMonitor {
    prev_space_id: Option<u64>,
    switches: u64,
}

impl SwitchMonitor {
    pub const fn new() -> Self {
        Self {
            prev_space_id: None,
            switches: 0,
        }
    }

    /// Record `active`; returns true if it is a new address space.
    pub fn observe(&mut self, active: u64) -> bool {
        if !space_changed(self.prev_space_id, active) {
            return false;
        }
        log::trace!(
            "context switch: {:?} -> {:#x}",
            self.prev_space_id,
            active
        );
        self.prev_space_id = Some(active);
        self.switches += 1;
        true
    }

    pub fn prev_space_id(&self) -> Option<u64> {
        self.prev_space_id
    }

    /// Number of switches observed since the last reset.
    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
