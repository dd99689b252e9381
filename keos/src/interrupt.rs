//! Interrupt management.
//!
//! Handlers are registered per kernel and invoked on the thread that owns the
//! processor when the interrupt is delivered. A handler runs with interrupts
//! masked and must never block.
use crate::thread::{try_current, with_current};
pub use abyss::interrupt::{
    InterruptGuard, InterruptState, Ipl, in_interrupt, raise_irq, splhigh, splx,
};
use std::sync::Arc;

#[doc(hidden)]
pub fn do_handle_interrupt(vec: usize) {
    let handler = try_current().and_then(|th| {
        let guard = th.kernel().handlers.lock();
        let handler = guard.get(&vec).cloned();
        guard.unlock();
        handler
    });

    match &handler {
        Some(handler) => handler(vec),
        _ => {
            panic!("Unknown interrupt #{vec}");
        }
    }
}

/// Register the interrupt handler of the vector `vec`.
///
/// The handler receives the vector it was delivered on.
pub fn register(vec: usize, handler: impl Fn(usize) + Send + Sync + 'static) {
    assert!(vec < abyss::NUM_IRQ, "Invalid index");
    with_current(|th| {
        let mut guard = th.kernel().handlers.lock();
        guard.insert(vec, Arc::new(handler));
        guard.unlock();
    });
}

/// Raise the interrupt line `vec`.
///
/// The interrupt is delivered once the current thread runs with interrupts
/// enabled, which is immediately if they are enabled already.
pub fn raise(vec: usize) {
    raise_irq(vec);
}
