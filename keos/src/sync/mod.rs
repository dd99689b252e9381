//! Synchronization utilities of the kernel.
//!
//! - [`SpinLock`]: a non-blocking lock for the kernel's internal tables.
//! - [`IntrFreeCell`]: state that is only touched with interrupts masked.

pub mod intr_cell;
pub mod spinlock;

pub use intr_cell::IntrFreeCell;
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
