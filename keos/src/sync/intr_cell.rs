//! Interior mutability under a masked interrupt level.
//!
//! Kernel threads never run in parallel: one thread owns the processor, and
//! the only ways another context can observe its data mid-update are an
//! interrupt handler or a context switch. Both are ruled out while interrupts
//! are masked and the thread does not sleep. An [`IntrFreeCell`] hands out
//! its contents only to code that proves interrupts are masked, by presenting
//! an [`InterruptGuard`].
//!
//! The borrow returned by [`IntrFreeCell::exclusive_access`] is tied to the
//! guard, so it cannot outlive the masked region. It must still be dropped
//! before the thread goes to sleep; a borrow held across
//! [`Current::sleep_on`] is reported as a double borrow by whichever thread
//! touches the cell next.
//!
//! [`Current::sleep_on`]: crate::thread::Current::sleep_on

use crate::thread::try_current;
use abyss::interrupt::InterruptGuard;
use core::cell::{RefCell, RefMut};

/// A cell whose contents may only be accessed with interrupts masked.
pub struct IntrFreeCell<T> {
    inner: RefCell<T>,
}

// Safety: contents are only reached through `exclusive_access`, which
// requires a kernel thread that owns the processor and has interrupts masked;
// no other context runs until that thread leaves the processor.
unsafe impl<T: Send> Sync for IntrFreeCell<T> {}

impl<T> IntrFreeCell<T> {
    /// Wraps `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// Borrows the contents mutably for as long as `guard` masks interrupts.
    ///
    /// # Panics
    ///
    /// When called outside of a kernel thread, or while the contents are
    /// already borrowed.
    #[track_caller]
    pub fn exclusive_access<'a>(&'a self, _guard: &'a InterruptGuard) -> RefMut<'a, T> {
        assert!(
            try_current().is_some(),
            "IntrFreeCell accessed outside of a kernel thread."
        );
        self.inner.borrow_mut()
    }

    /// Mutable access through a unique reference, which needs no masking.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for IntrFreeCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
