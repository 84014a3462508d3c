//! Platform abstraction layer for host operations.
//!
//! Trace records carry a monotonic timestamp. On a `std` host it comes from
//! the host clock. Unit tests and bare `no_std` builds use a mock counter so
//! record contents stay deterministic; a `no_std` host installs its own clock
//! with [`set_time_source`].

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Once;

/// Platform operations trait.
pub trait PlatformOps {
    /// Get current monotonic time in nanoseconds.
    fn time_ns() -> u64;
}

// =============================================================================
// Real Implementation (std host)
// =============================================================================

/// Host clock, measured from the first call in this process.
#[cfg(all(not(test), feature = "std"))]
pub struct RealPlatform;

#[cfg(all(not(test), feature = "std"))]
impl PlatformOps for RealPlatform {
    fn time_ns() -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static START: OnceLock<Instant> = OnceLock::new();
        START.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

// =============================================================================
// Mock Implementation (test environment or no std)
// =============================================================================

/// Mock time value for testing.
static MOCK_TIME_NS: AtomicU64 = AtomicU64::new(1_000_000_000); // 1 second

/// Host-supplied clock, replacing the mock counter once installed.
static TIME_SOURCE: Once<fn() -> u64> = Once::new();

/// Install the monotonic clock used when no host clock is built in.
///
/// Only the first call takes effect. Returns false if a source was already
/// installed. Builds with the `std` host clock ignore it.
pub fn set_time_source(source: fn() -> u64) -> bool {
    let mut installed = false;
    TIME_SOURCE.call_once(|| {
        installed = true;
        source
    });
    installed
}

/// Mock platform operations for testing.
#[cfg(any(test, not(feature = "std")))]
pub struct MockPlatform;

#[cfg(any(test, not(feature = "std")))]
impl PlatformOps for MockPlatform {
    fn time_ns() -> u64 {
        match TIME_SOURCE.get() {
            Some(source) => source(),
            None => MOCK_TIME_NS.load(Ordering::Relaxed),
        }
    }
}

/// Set mock time for testing.
pub fn set_mock_time(ns: u64) {
    MOCK_TIME_NS.store(ns, Ordering::Relaxed);
}

/// Advance mock time by given nanoseconds.
pub fn advance_mock_time(ns: u64) {
    MOCK_TIME_NS.fetch_add(ns, Ordering::Relaxed);
}

// =============================================================================
// Platform Type Alias
// =============================================================================

/// The active platform implementation.
#[cfg(all(not(test), feature = "std"))]
pub type Platform = RealPlatform;

#[cfg(any(test, not(feature = "std")))]
pub type Platform = MockPlatform;

/// Get current time in nanoseconds.
#[inline]
pub fn time_ns() -> u64 {
    Platform::time_ns()
}
