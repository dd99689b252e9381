//! Interrupt-masking spinlock.
//!
//! On a uniprocessor, a spinlock is simple: it only has to keep the lock
//! holder on the processor until it unlocks. The holder therefore runs with
//! interrupts masked, so neither an interrupt handler nor a context switch
//! can observe the protected data half-updated.
//!
//! A spinlock never sleeps. It protects the kernel's own tables, which are
//! touched for a few instructions at a time; code that has to wait for
//! another thread uses the blocking primitives built on
//! [`crate::thread::Current::sleep_on`] instead.
//!
//! Unlike `std::sync::Mutex`, the guard must be released explicitly with
//! [`SpinLockGuard::unlock`]:
//!
//! ```ignore
//! let mut threads = kernel.threads.lock();
//! threads.insert(tid, th);
//! threads.unlock();
//! ```

pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
