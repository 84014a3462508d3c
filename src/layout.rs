//! Guest kernel data-structure layout.
//!
//! The engine has no type information about the guest kernel. Every field it
//! reads is addressed through the offsets gathered here, so supporting a new
//! guest kernel build means filling in one `KernelLayout`.

/// Size of the kernel's `comm` buffer.
pub const TASK_COMM_LEN: usize = 16;

/// AArch64 TTBRx_EL1 BADDR field: drops the ASID (bits [63:48]) and CnP (bit 0).
pub const DEFAULT_BASE_MASK: u64 = 0x0000_FFFF_FFFF_FFFE;

/// Upper bound on nodes visited per walk (Linux default `pid_max`).
pub const DEFAULT_MAX_TASKS: usize = 32768;

/// Byte offsets of the fields read from a `task_struct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOffsets {
    /// `comm[TASK_COMM_LEN]`
    pub comm: usize,
    /// `tasks` list head (its `next` pointer is the first word).
    pub tasks: usize,
    /// `mm` pointer.
    pub mm: usize,
    /// `pid`
    pub pid: usize,
}

/// Byte offsets of the fields read from an `mm_struct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmOffsets {
    /// `pgd` pointer (kernel linear-map virtual address).
    pub pgd: usize,
}

/// Complete description of the guest kernel as seen by the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLayout {
    /// Address of the static head-of-list task (`init_task`).
    pub init_task: u64,
    pub task: TaskOffsets,
    pub mm: MmOffsets,
    /// Subtracted from `mm->pgd` to obtain the value held in the base register.
    pub linear_map_offset: u64,
    /// Applied to the base register before comparing with a resolved base.
    pub base_mask: u64,
    /// Walk bound for lists that never return to the anchor.
    pub max_tasks: usize,
}

impl KernelLayout {
    /// Create a layout. Linear-map offset and base mask depend on the guest
    /// kernel configuration and must always be supplied.
    pub const fn new(
        init_task: u64,
        task: TaskOffsets,
        mm: MmOffsets,
        linear_map_offset: u64,
        base_mask: u64,
    ) -> Self {
        Self {
            init_task,
            task,
            mm,
            linear_map_offset,
            base_mask,
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }

    /// Override the walk bound.
    pub const fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Translate a linear-map `pgd` pointer into a page-table base.
    #[inline]
    pub fn pgd_to_base(&self, pgd: u64) -> u64 {
        pgd.wrapping_sub(self.linear_map_offset)
    }

    /// Strip non-address bits from an active base register value.
    #[inline]
    pub fn mask_space_id(&self, space_id: u64) -> u64 {
        space_id & self.base_mask
    }

    /// Recover the enclosing task from a `tasks.next` pointer.
    #[inline]
    pub fn node_from_link(&self, link: u64) -> u64 {
        link.wrapping_sub(self.task.tasks as u64)
    }
}
