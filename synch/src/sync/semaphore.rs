//! # Semaphore.
//!
//! A **semaphore** regulates concurrent access to a finite set of resources.
//! It maintains a count of available "permits": [`Semaphore::wait`] (the
//! classic `P`) takes one, blocking while none is left, and
//! [`Semaphore::signal`] (`V`) gives one back.
//!
//! A semaphore created with zero permits serves as an event: one thread waits
//! for it, and another signals once the event has occurred.
//!
//! ## Wakeup policy
//!
//! [`Semaphore::signal`] wakes **every** thread sleeping on the semaphore.
//! Each of them rechecks the count when it runs; the first one takes the
//! permit and the rest go back to sleep. No order among the waiters is
//! promised.
//!
//! #### Usage Example
//!
//! ```ignore
//! let sema = Semaphore::new("disk slots", 3)?; // Up to 3 concurrent users.
//!
//! // Acquire a permit (blocks if unavailable).
//! let permit = sema.permit();
//!
//! // Critical section (up to 3 threads can enter concurrently).
//!
//! // The permit is released when `permit` goes out of scope.
//! drop(permit);
//! ```

use super::{dup_name, tearing_down};
use alloc::string::String;
use keos::{
    KernelError, debug,
    interrupt::{InterruptGuard, in_interrupt},
    sync::IntrFreeCell,
    thread::{Current, WaitChannel, has_sleepers, wakeup},
};

/// Counting semaphore.
///
/// The count never goes below zero: a thread that finds no permit sleeps
/// until one is signaled.
pub struct Semaphore {
    name: String,
    chan: WaitChannel,
    count: IntrFreeCell<usize>,
}

impl Semaphore {
    /// Creates a new semaphore initialized with `initial_count` permits.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the name cannot be copied.
    pub fn new(name: &str, initial_count: usize) -> Result<Self, KernelError> {
        let name = dup_name(name)?;
        debug!("Semaphore `{name}` created with {initial_count} permits.");
        Ok(Self {
            name,
            chan: WaitChannel::new(),
            count: IntrFreeCell::new(initial_count),
        })
    }

    /// Name of the semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel threads blocked on this semaphore sleep on.
    #[doc(hidden)]
    pub fn channel(&self) -> WaitChannel {
        self.chan
    }

    /// Number of available permits.
    pub fn count(&self) -> usize {
        let guard = InterruptGuard::new();
        let count = *self.count.exclusive_access(&guard);
        count
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// If no permits are available, this function will block the current
    /// thread until another thread calls [`Semaphore::signal`].
    ///
    /// # Panics
    ///
    /// When called from an interrupt handler, even if a permit is available.
    #[doc(alias = "P")]
    pub fn wait(&self) {
        assert!(
            !in_interrupt(),
            "Semaphore `{}`: may not block in an interrupt handler.",
            self.name
        );
        let guard = InterruptGuard::new();
        while *self.count.exclusive_access(&guard) == 0 {
            Current::sleep_on(self.chan);
        }
        *self.count.exclusive_access(&guard) -= 1;
    }

    /// Waits for a permit like [`Semaphore::wait`], and returns it as a
    /// [`SemaphorePermit`] that signals the semaphore when dropped.
    pub fn permit(&self) -> SemaphorePermit<'_> {
        self.wait();
        SemaphorePermit { sema: self }
    }

    /// Releases a permit back to the semaphore.
    ///
    /// This method increases the number of available permits by one and
    /// wakes up every thread blocked in [`Semaphore::wait`]. It never blocks,
    /// so interrupt handlers may call it.
    #[doc(alias = "V")]
    pub fn signal(&self) {
        let guard = InterruptGuard::new();
        let mut count = self.count.exclusive_access(&guard);
        *count = match count.checked_add(1) {
            Some(next) => next,
            None => panic!("Semaphore `{}`: count overflow.", self.name),
        };
        drop(count);
        wakeup(self.chan);
    }

    /// Destroys the semaphore.
    ///
    /// Same as dropping it.
    ///
    /// # Panics
    ///
    /// If a thread is blocked on the semaphore. A thread that starts waiting
    /// after this check is the caller's bug and goes unnoticed.
    pub fn destroy(self) {
        drop(self)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if tearing_down() {
            return;
        }
        let guard = InterruptGuard::new();
        let busy = has_sleepers(self.chan);
        drop(guard);
        assert!(
            !busy,
            "Semaphore `{}` destroyed while threads are waiting on it.",
            self.name
        );
        debug!("Semaphore `{}` destroyed.", self.name);
    }
}

/// An RAII implementation of a "scoped semaphore". When this structure
/// is dropped (falls out of scope), the semaphore will be signaled.
///
/// This structure is created by the [`permit`] method on [`Semaphore`].
///
/// [`permit`]: Semaphore::permit
pub struct SemaphorePermit<'a> {
    sema: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if !keos::halted() {
            self.sema.signal()
        }
    }
}
