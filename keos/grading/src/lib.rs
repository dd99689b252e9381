//! Helpers for testing kernel code on the emulated processor.
//!
//! - `#[kernel_test]` runs a test as the boot thread of a fresh kernel.
//! - `#[assert_exit_code(N)]` runs a test in its own kernel thread and checks
//!   how the thread ended; a fatal usage error shows up as `-1`.
//!
//! Both go below `#[test]`:
//!
//! ```ignore
//! #[test]
//! #[assert_exit_code(-1)]
//! fn wait_without_lock() {
//!     let cv = ConditionVariable::new("cv").unwrap();
//!     let lock = Lock::new("lock").unwrap();
//!     cv.wait(&lock);
//! }
//! ```
extern crate grading_derive;

pub use grading_derive::*;
use keos::thread::Current;

/// How many times [`wait_until`] yields before giving up.
pub const MAX_YIELDS: usize = 10_000;

/// Yields the current kernel thread until `cond` holds.
///
/// # Panics
///
/// If `cond` still does not hold after [`MAX_YIELDS`] yields.
#[track_caller]
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..MAX_YIELDS {
        if cond() {
            return;
        }
        Current::yield_now();
    }
    assert!(cond(), "Condition still false after {MAX_YIELDS} yields.");
}

/// Yields the current kernel thread `n` times.
pub fn yield_times(n: usize) {
    for _ in 0..n {
        Current::yield_now();
    }
}
