//! # Lock.
//!
//! A **lock** provides mutual exclusion: at most one thread holds it at a
//! time, and a thread that finds it held sleeps until it is released.
//!
//! The lock of this module is **reentrant**. Its holder may acquire it again
//! without deadlocking itself; every [`Lock::acquire`] adds one hold, and the
//! lock becomes free once the holder has called [`Lock::release`] as many
//! times as it acquired.
//!
//! ```text
//!              acquire by T                    acquire by T
//!   Free  ----------------------> Held(T, 1) ----------------> Held(T, 2)
//!    ^                             |      ^                        |
//!    +-----------------------------+      +------------------------+
//!             release by T                       release by T
//! ```
//!
//! A release that frees the lock wakes up every thread sleeping on it. Each of
//! them rechecks the lock and the first one to run takes it.
//!
//! The holder is recorded as a [`Tid`]. The lock never dereferences it; the
//! id is only compared with the id of the calling thread.
//!
//! ## Releasing a lock one does not hold
//!
//! Such a release is ignored and reported on the console. With the
//! `strict_release` feature it is fatal instead.

use super::dup_name;
use alloc::string::String;
use core::{marker::PhantomData, num::NonZeroUsize};
use keos::{
    KernelError, debug,
    interrupt::InterruptGuard,
    sync::IntrFreeCell,
    thread::{Current, Tid, WaitChannel, wakeup},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LockState {
    Free,
    Held { owner: Tid, depth: NonZeroUsize },
}

/// A reentrant mutual exclusion lock.
pub struct Lock {
    name: String,
    chan: WaitChannel,
    state: IntrFreeCell<LockState>,
}

impl Lock {
    /// Creates a new lock in the free state.
    ///
    /// # Errors
    ///
    /// [`KernelError::NoMemory`] if the name cannot be copied.
    pub fn new(name: &str) -> Result<Self, KernelError> {
        let name = dup_name(name)?;
        debug!("Lock `{name}` created.");
        Ok(Self {
            name,
            chan: WaitChannel::new(),
            state: IntrFreeCell::new(LockState::Free),
        })
    }

    /// Name of the lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the lock, blocking until it is free.
    ///
    /// If the current thread already holds the lock, this adds one hold and
    /// returns immediately.
    pub fn acquire(&self) {
        let me = Current::get_tid();
        let guard = InterruptGuard::new();
        {
            let mut state = self.state.exclusive_access(&guard);
            if let LockState::Held { owner, depth } = &mut *state {
                if *owner == me {
                    *depth = match depth.checked_add(1) {
                        Some(next) => next,
                        None => panic!("Lock `{}`: hold count overflow.", self.name),
                    };
                    return;
                }
            }
        }
        self.acquire_free(&guard, me, NonZeroUsize::MIN);
    }

    /// Sleeps until the lock is free, then takes it with `depth` holds.
    fn acquire_free(&self, guard: &InterruptGuard, me: Tid, depth: NonZeroUsize) {
        while *self.state.exclusive_access(guard) != LockState::Free {
            Current::sleep_on(self.chan);
        }
        *self.state.exclusive_access(guard) = LockState::Held { owner: me, depth };
    }

    /// Acquires the lock like [`Lock::acquire`] and returns a [`LockGuard`]
    /// that releases it when dropped.
    pub fn hold(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Releases one hold of the lock.
    ///
    /// The lock becomes free when its last hold is released, and every
    /// thread waiting for it is woken up.
    pub fn release(&self) {
        let me = Current::get_tid();
        let guard = InterruptGuard::new();
        let mut state = self.state.exclusive_access(&guard);
        let current = *state;
        match current {
            LockState::Held { owner, depth } if owner == me => {
                match NonZeroUsize::new(depth.get() - 1) {
                    Some(depth) => *state = LockState::Held { owner, depth },
                    None => {
                        *state = LockState::Free;
                        drop(state);
                        wakeup(self.chan);
                    }
                }
            }
            _ => {
                drop(state);
                self.reject_release(me);
            }
        }
    }

    #[cfg(not(feature = "strict_release"))]
    fn reject_release(&self, me: Tid) {
        keos::warning!(
            "Lock `{}`: ignoring release by {me}, which does not hold it.",
            self.name
        );
    }

    #[cfg(feature = "strict_release")]
    fn reject_release(&self, me: Tid) {
        panic!(
            "Lock `{}`: released by {me}, which does not hold it.",
            self.name
        );
    }

    /// Whether the current thread holds the lock.
    pub fn do_i_hold(&self) -> bool {
        let me = Current::get_tid();
        self.holder() == Some(me)
    }

    /// The thread holding the lock, if any.
    pub fn holder(&self) -> Option<Tid> {
        let guard = InterruptGuard::new();
        let holder = match *self.state.exclusive_access(&guard) {
            LockState::Held { owner, .. } => Some(owner),
            LockState::Free => None,
        };
        holder
    }

    /// Gives up every hold of the current thread and returns how many there
    /// were, waking up the threads waiting for the lock.
    pub(crate) fn release_all(&self, guard: &InterruptGuard) -> NonZeroUsize {
        let me = Current::get_tid();
        let mut state = self.state.exclusive_access(guard);
        let LockState::Held { owner, depth } = *state else {
            panic!("Lock `{}`: not held by {me}.", self.name);
        };
        assert_eq!(owner, me, "Lock `{}`: not held by {me}.", self.name);
        *state = LockState::Free;
        drop(state);
        wakeup(self.chan);
        depth
    }

    /// Takes the lock back with the holds [`Lock::release_all`] gave up.
    pub(crate) fn reacquire(&self, guard: &InterruptGuard, depth: NonZeroUsize) {
        self.acquire_free(guard, Current::get_tid(), depth);
    }

    /// Destroys the lock.
    ///
    /// Same as dropping it.
    pub fn destroy(self) {
        drop(self)
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let LockState::Held { owner, depth } = *self.state.get_mut() {
            debug!(
                "Lock `{}` destroyed while {owner} holds it {depth} time(s).",
                self.name
            );
        } else {
            debug!("Lock `{}` destroyed.", self.name);
        }
    }
}

/// An RAII implementation of a "scoped lock". When this structure is dropped
/// (falls out of scope), one hold of the lock is released.
///
/// The guard belongs to the thread that acquired the lock, so it is not
/// [`Send`].
///
/// This structure is created by the [`hold`] method on [`Lock`].
///
/// [`hold`]: Lock::hold
pub struct LockGuard<'a> {
    lock: &'a Lock,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
    /// The lock this guard holds.
    pub fn lock(&self) -> &Lock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !keos::halted() {
            self.lock.release();
        }
    }
}
