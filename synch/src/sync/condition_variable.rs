//! # Condition Variable.
//!
//! A **condition variable** lets a thread sleep until another thread tells it
//! that some condition over shared data may have changed. The shared data is
//! protected by a [`Lock`], and a condition variable is always used with the
//! same lock over its whole life. That pairing is the caller's contract; the
//! condition variable does not remember the lock.
//!
//! [`ConditionVariable::wait`] atomically releases the lock and puts the
//! caller to sleep. When the caller is woken up, it takes the lock back before
//! returning, so the caller always rechecks its condition with the lock held:
//!
//! ```ignore
//! lock.acquire();
//! while queue.is_empty() {
//!     cv.wait(&lock);
//! }
//! let item = queue.pop();
//! lock.release();
//! ```
//!
//! ## Waking up waiters
//!
//! Waiters are queued in arrival order and each waiter sleeps on the channel
//! of its own thread. [`ConditionVariable::signal`] therefore wakes exactly
//! one thread, the earliest waiter, and [`ConditionVariable::broadcast`] wakes
//! all of them in arrival order.
//!
//! The caller of [`ConditionVariable::wait`], [`ConditionVariable::signal`] and
//! [`ConditionVariable::broadcast`] must hold the lock; calling them without it
//! is fatal.
//!
//! ## Reentrant holds
//!
//! When the caller of [`ConditionVariable::wait`] holds the lock several
//! times, all the holds are given up while it sleeps, and the same number of
//! holds is restored before `wait` returns.

use super::{Lock, dup_name, tearing_down};
use alloc::{collections::VecDeque, string::String};
use keos::{
    KernelError, debug,
    interrupt::InterruptGuard,
    sync::IntrFreeCell,
    thread::{Current, Tid, WaitChannel, wakeup_one},
};

/// Capacity reserved for waiters when a condition variable is created.
const INITIAL_WAITERS: usize = 2;

/// A condition variable.
pub struct ConditionVariable {
    name: String,
    waiters: IntrFreeCell<VecDeque<Tid>>,
}

impl ConditionVariable {
    /// Creates a new condition variable with no waiters.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the name or the waiter queue cannot be
    /// allocated.
    pub fn new(name: &str) -> Result<Self, KernelError> {
        let name = dup_name(name)?;
        let mut waiters = VecDeque::new();
        waiters.try_reserve(INITIAL_WAITERS)?;
        debug!("Condition variable `{name}` created.");
        Ok(Self {
            name,
            waiters: IntrFreeCell::new(waiters),
        })
    }

    /// Name of the condition variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of threads waiting on the condition variable.
    pub fn waiters(&self) -> usize {
        let guard = InterruptGuard::new();
        let len = self.waiters.exclusive_access(&guard).len();
        len
    }

    fn check_held(&self, lock: &Lock, op: &str) {
        assert!(
            lock.do_i_hold(),
            "ConditionVariable `{}`: {op} without holding lock `{}`.",
            self.name,
            lock.name()
        );
    }

    /// Releases `lock`, sleeps until signaled, and reacquires `lock`.
    ///
    /// # Panics
    ///
    /// If the current thread does not hold `lock`, or if the waiter queue
    /// cannot grow.
    pub fn wait(&self, lock: &Lock) {
        self.check_held(lock, "wait");
        let me = Current::get_tid();
        let guard = InterruptGuard::new();
        {
            let mut waiters = self.waiters.exclusive_access(&guard);
            if waiters.try_reserve(1).is_err() {
                panic!("ConditionVariable `{}`: out of memory.", self.name);
            }
            waiters.push_back(me);
        }
        let depth = lock.release_all(&guard);
        // Only a signal or a broadcast dequeues us.
        while self.waiters.exclusive_access(&guard).contains(&me) {
            Current::sleep_on(WaitChannel::of(me));
        }
        lock.reacquire(&guard, depth);
    }

    /// Wakes up the earliest waiter, if any.
    ///
    /// # Panics
    ///
    /// If the current thread does not hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        self.check_held(lock, "signal");
        let guard = InterruptGuard::new();
        let next = self.waiters.exclusive_access(&guard).pop_front();
        if let Some(tid) = next {
            wakeup_one(tid);
        }
    }

    /// Wakes up every waiter.
    ///
    /// # Panics
    ///
    /// If the current thread does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        self.check_held(lock, "broadcast");
        let guard = InterruptGuard::new();
        loop {
            let next = self.waiters.exclusive_access(&guard).pop_front();
            match next {
                Some(tid) => wakeup_one(tid),
                None => break,
            }
        }
    }

    /// Destroys the condition variable.
    ///
    /// Same as dropping it.
    ///
    /// # Panics
    ///
    /// If a thread still waits on the condition variable.
    pub fn destroy(self) {
        drop(self)
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        if tearing_down() {
            return;
        }
        let waiting = self.waiters.get_mut().len();
        assert!(
            waiting == 0,
            "ConditionVariable `{}` destroyed while {waiting} thread(s) wait on it.",
            self.name
        );
        debug!("Condition variable `{}` destroyed.", self.name);
    }
}
