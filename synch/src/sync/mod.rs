//! # Synchronization Primitives.
//!
//! A kernel must coordinate its threads of execution around shared resources.
//! The kernel substrate offers only a [`SpinLock`], which busy-waits, and two
//! low-level mechanisms: a thread can sleep on a [`WaitChannel`] until the
//! channel is woken up, and it can mask interrupts to make a short state
//! update atomic. The primitives in this module put threads to sleep instead
//! of spinning.
//!
//! | Primitive             | Blocks Thread? | Wakeup on release          | Typical Use Case                        |
//! |-----------------------|----------------|----------------------------|-----------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | -                          | Short critical sections in the kernel   |
//! | [`Semaphore`]         | Yes            | every sleeper, then recheck | Limiting access to a bounded resource  |
//! | [`Lock`]              | Yes            | every sleeper, then recheck | Exclusive access to shared data        |
//! | [`ConditionVariable`] | Yes            | exactly one, in FIFO order | Waiting for a condition to become true  |
//!
//! ## How the primitives are built
//!
//! Each primitive keeps its state in an [`IntrFreeCell`], which is only
//! accessible while an [`InterruptGuard`] masks interrupts. Since the kernel
//! runs on one processor and is never preempted while interrupts are masked,
//! the check-and-update of that state is atomic with respect to every other
//! thread and every interrupt handler.
//!
//! A thread that cannot proceed goes to sleep *without dropping the guard*.
//! The check and the sleep therefore happen in one masked region, and a
//! wakeup cannot slip in between. The guard is part of the sleeping thread's
//! state: other threads run with their own interrupt level while it sleeps,
//! and it wakes up still masked to recheck its condition.
//!
//! [`Semaphore`] and [`Lock`] sleep on a channel of their own and wake all of
//! its sleepers on release. Each woken thread rechecks the state in a loop,
//! and only one of them gets through; the others go back to sleep.
//! [`ConditionVariable`] queues the waiters' [`Tid`]s and each waiter sleeps on
//! its own channel, which lets [`ConditionVariable::signal`] wake exactly the
//! earliest waiter.
//!
//! ## Usage errors
//!
//! Creating a primitive fails with [`KernelError::NoMemory`] when its storage
//! cannot be allocated. Misuse is fatal and panics: blocking in an interrupt
//! handler, destroying a primitive that threads still wait on, or using a
//! condition variable without holding its lock.
//!
//! [`SpinLock`]: keos::sync::SpinLock
//! [`IntrFreeCell`]: keos::sync::IntrFreeCell
//! [`InterruptGuard`]: keos::interrupt::InterruptGuard
//! [`WaitChannel`]: keos::thread::WaitChannel
//! [`Tid`]: keos::thread::Tid
//! [`KernelError::NoMemory`]: keos::KernelError::NoMemory

pub mod condition_variable;
pub mod lock;
pub mod semaphore;

pub use condition_variable::ConditionVariable;
pub use lock::{Lock, LockGuard};
pub use semaphore::{Semaphore, SemaphorePermit};

use alloc::string::String;
use keos::KernelError;

/// Copies `name` into storage owned by a primitive.
fn dup_name(name: &str) -> Result<String, KernelError> {
    let mut owned = String::new();
    owned.try_reserve_exact(name.len())?;
    owned.push_str(name);
    Ok(owned)
}

/// Whether drop-time consistency checks must be skipped.
fn tearing_down() -> bool {
    keos::panicking() || keos::halted()
}
