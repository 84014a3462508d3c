//! Integration tests for guest task-list traversal.
//!
//! Builds small circular task lists in a `SparseMemory` image and checks
//! lookup results, kernel-thread filtering and the cycle guards.

use core::cell::Cell;

use axerrno::AxResult;
use axvmi::layout::{KernelLayout, MmOffsets, TaskOffsets, DEFAULT_BASE_MASK, TASK_COMM_LEN};
use axvmi::process::ProcessLocator;
use axvmi::{GuestMemory, SparseMemory, VmiError};

// =============================================================================
// Mock Guest
// =============================================================================

const INIT_TASK: u64 = 0x10_0000;
const TASK_SIZE: u64 = 0x100;
const MM_AREA: u64 = 0x20_0000;
const LINEAR_MAP_OFFSET: u64 = 0xffff_0000_0000_0000;

const COMM: usize = 0x20;
const TASKS: usize = 0x40;
const MM: usize = 0x50;
const PID: usize = 0x60;
const PGD: usize = 0x48;

fn layout() -> KernelLayout {
    KernelLayout::new(
        INIT_TASK,
        TaskOffsets {
            comm: COMM,
            tasks: TASKS,
            mm: MM,
            pid: PID,
        },
        MmOffsets { pgd: PGD },
        LINEAR_MAP_OFFSET,
        DEFAULT_BASE_MASK,
    )
}

fn node(idx: usize) -> u64 {
    INIT_TASK + idx as u64 * TASK_SIZE
}

fn set_next(mem: &mut SparseMemory, from: u64, to: u64) {
    assert!(mem.write_u64(from + TASKS as u64, to + TASKS as u64));
}

/// Anchor `swapper` followed by `tasks`, linked in a circle.
///
/// A task with `Some(base)` gets a memory descriptor whose pgd is the
/// linear-map address of `base`.
fn guest(tasks: &[(&str, u32, Option<u64>)]) -> SparseMemory {
    let mut mem = SparseMemory::new();
    let all: Vec<(&str, u32, Option<u64>)> = core::iter::once(("swapper", 0, None))
        .chain(tasks.iter().copied())
        .collect();

    for (idx, (name, pid, base)) in all.iter().enumerate() {
        let task = node(idx);
        mem.map_zeroed(task, TASK_SIZE as usize);
        assert!(mem.write(task + COMM as u64, name.as_bytes()));
        assert!(mem.write_u32(task + PID as u64, *pid));

        if let Some(base) = base {
            let mm = MM_AREA + idx as u64 * TASK_SIZE;
            mem.map_zeroed(mm, TASK_SIZE as usize);
            assert!(mem.write_u64(mm + PGD as u64, base + LINEAR_MAP_OFFSET));
            assert!(mem.write_u64(task + MM as u64, mm));
        }

        let next = node((idx + 1) % all.len());
        set_next(&mut mem, task, next);
    }
    mem
}

/// Counts reads and forwards them to the inner image.
struct CountingMemory<'a> {
    inner: &'a SparseMemory,
    reads: Cell<usize>,
}

impl GuestMemory for CountingMemory<'_> {
    fn read(&self, addr: u64, buf: &mut [u8]) -> AxResult<()> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(addr, buf)
    }
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_locate_returns_pid_and_base() {
    let mem = guest(&[("shell", 1, Some(0x8000)), ("target", 42, Some(0x1000))]);
    let layout = layout();

    let rec = ProcessLocator::new(&mem, &layout).locate("target").unwrap();
    assert_eq!(rec.name, "target");
    assert_eq!(rec.pid, 42);
    assert_eq!(rec.base, 0x1000);
    assert_eq!(rec.node, node(2));
}

#[test]
fn test_locate_missing_name_is_not_found() {
    let mem = guest(&[("shell", 1, Some(0x8000))]);
    let layout = layout();

    let err = ProcessLocator::new(&mem, &layout).locate("target").unwrap_err();
    assert_eq!(err, VmiError::NotFound);
}

#[test]
fn test_locate_first_match_wins() {
    let mem = guest(&[("dup", 10, Some(0x1000)), ("dup", 11, Some(0x2000))]);
    let layout = layout();

    let rec = ProcessLocator::new(&mem, &layout).locate("dup").unwrap();
    assert_eq!(rec.pid, 10);
}

#[test]
fn test_locate_prefix_does_not_match() {
    let mem = guest(&[("targetd", 1, Some(0x1000))]);
    let layout = layout();

    let locator = ProcessLocator::new(&mem, &layout);
    assert_eq!(locator.locate("target").unwrap_err(), VmiError::NotFound);
    assert_eq!(locator.locate("targetd").unwrap().pid, 1);
}

#[test]
fn test_locate_full_width_name() {
    let name = "abcdefghijklmnop";
    assert_eq!(name.len(), TASK_COMM_LEN);
    let mem = guest(&[(name, 7, Some(0x3000))]);
    let layout = layout();

    let rec = ProcessLocator::new(&mem, &layout).locate(name).unwrap();
    assert_eq!(rec.pid, 7);
}

#[test]
fn test_locate_rejects_long_name_without_reading() {
    let image = guest(&[("target", 1, Some(0x1000))]);
    let mem = CountingMemory {
        inner: &image,
        reads: Cell::new(0),
    };
    let layout = layout();

    let err = ProcessLocator::new(&mem, &layout)
        .locate("abcdefghijklmnopq")
        .unwrap_err();
    assert_eq!(err, VmiError::NameTooLong { len: 17 });
    assert_eq!(mem.reads.get(), 0);
}

#[test]
fn test_kernel_thread_is_skipped() {
    let mem = guest(&[("worker", 5, None), ("worker", 6, Some(0x5000))]);
    let layout = layout();

    let rec = ProcessLocator::new(&mem, &layout).locate("worker").unwrap();
    assert_eq!(rec.pid, 6);
    assert_eq!(rec.base, 0x5000);
}

#[test]
fn test_only_kernel_thread_is_not_found() {
    let mem = guest(&[("kthreadd", 2, None)]);
    let layout = layout();

    let err = ProcessLocator::new(&mem, &layout).locate("kthreadd").unwrap_err();
    assert_eq!(err, VmiError::NotFound);
}

// =============================================================================
// Cycle Guard Tests
// =============================================================================

#[test]
fn test_self_link_ends_walk() {
    let mut mem = guest(&[("a", 1, Some(0x1000)), ("b", 2, Some(0x2000))]);
    set_next(&mut mem, node(1), node(1));
    let layout = layout();

    let locator = ProcessLocator::new(&mem, &layout);
    assert_eq!(locator.locate("b").unwrap_err(), VmiError::NotFound);
    assert_eq!(locator.locate("a").unwrap().pid, 1);
}

#[test]
fn test_cycle_not_through_anchor_is_bounded() {
    // anchor -> a -> b -> c -> a ...
    let mut mem = guest(&[
        ("a", 1, Some(0x1000)),
        ("b", 2, Some(0x2000)),
        ("c", 3, Some(0x3000)),
    ]);
    set_next(&mut mem, node(3), node(1));
    let layout = layout().with_max_tasks(16);

    let counting = CountingMemory {
        inner: &mem,
        reads: Cell::new(0),
    };
    let err = ProcessLocator::new(&counting, &layout)
        .locate("missing")
        .unwrap_err();
    assert_eq!(err, VmiError::NotFound);
    // One comm read and one link read per visited task.
    assert_eq!(counting.reads.get(), 16 * 2);
}

#[test]
fn test_unreadable_link_aborts_walk() {
    let mut mem = guest(&[("a", 1, Some(0x1000)), ("b", 2, Some(0x2000))]);
    mem.unmap(node(2));
    let layout = layout();

    let err = ProcessLocator::new(&mem, &layout).locate("b").unwrap_err();
    assert!(matches!(err, VmiError::Unreadable { .. }));
}

#[test]
fn test_unreadable_mm_aborts_walk() {
    let mut mem = guest(&[("target", 1, Some(0x1000))]);
    mem.unmap(MM_AREA + TASK_SIZE);
    let layout = layout();

    let err = ProcessLocator::new(&mem, &layout).locate("target").unwrap_err();
    assert_eq!(
        err,
        VmiError::Unreadable {
            addr: MM_AREA + TASK_SIZE + PGD as u64,
            len: 8
        }
    );
}

#[test]
fn test_walk_stops_at_unreadable_anchor() {
    let mem = SparseMemory::new();
    let layout = layout();

    let err = ProcessLocator::new(&mem, &layout).locate("target").unwrap_err();
    assert!(matches!(err, VmiError::Unreadable { addr, .. } if addr == INIT_TASK + COMM as u64));
}

// =============================================================================
// Listing Tests
// =============================================================================

#[test]
fn test_list_includes_every_task() {
    let mem = guest(&[("init", 1, Some(0x1000)), ("kworker/0:1", 9, None)]);
    let layout = layout();

    let tasks = ProcessLocator::new(&mem, &layout).list().unwrap();
    let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["swapper", "init", "kworker/0:1"]);
    assert!(!tasks[0].has_mm);
    assert!(tasks[1].has_mm);
    assert_eq!(tasks[2].pid, 9);
}
