//! Interrupt
//!
//! The processor has two interrupt priority levels: [`Ipl::Low`], at which
//! interrupts are delivered, and [`Ipl::High`], at which they are held until
//! the level drops again. The level belongs to the running execution context
//! and travels with it across context switches.
//!
//! Interrupt handlers run at [`Ipl::High`], and [`in_interrupt`] reports true
//! for their whole duration. An interrupt raised while the level is high, or
//! while a handler is running, stays pending in the processor.
#[cfg(doc)]
use crate::spinlock::SpinLockGuard;
use crate::{
    NUM_IRQ,
    cpu::{Power, Processor},
};
use core::{
    cell::Cell,
    marker::PhantomData,
    sync::atomic::{Ordering, fence},
};

/// Interrupt priority level.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Ipl {
    /// Interrupts are delivered.
    Low,
    /// Interrupts are held pending.
    High,
}

thread_local! {
    static LEVEL: Cell<Ipl> = const { Cell::new(Ipl::Low) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static IN_INTERRUPT: Cell<bool> = const { Cell::new(false) };
}

/// Enumeration representing the interrupt state.
#[derive(PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// Reads the current interrupt state.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if interrupts are disabled.
    pub fn current() -> Self {
        match LEVEL.with(Cell::get) {
            Ipl::Low => Self::On,
            Ipl::High => Self::Off,
        }
    }
}

/// Raises the priority level to [`Ipl::High`] and returns the previous level.
pub fn splhigh() -> Ipl {
    let prior = LEVEL.with(|level| level.replace(Ipl::High));
    fence(Ordering::SeqCst);
    prior
}

/// Sets the priority level to `level` and returns the previous level.
///
/// Dropping to [`Ipl::Low`] delivers interrupts that became pending while the
/// level was high.
pub fn splx(level: Ipl) -> Ipl {
    fence(Ordering::SeqCst);
    let prior = LEVEL.with(|l| l.replace(level));
    if level == Ipl::Low {
        check_pending();
    }
    prior
}

/// Whether the caller is running inside an interrupt handler.
pub fn in_interrupt() -> bool {
    IN_INTERRUPT.with(Cell::get)
}

/// Asserts the interrupt line `vector` of the current processor.
///
/// The interrupt is delivered right away if the caller runs at [`Ipl::Low`]
/// outside of a handler, and as soon as that becomes true otherwise.
pub fn raise_irq(vector: usize) {
    assert!(vector < NUM_IRQ, "Invalid interrupt vector: {vector}");
    let Some(cpu) = Processor::current() else {
        panic!("Interrupt #{vector} raised outside of a processor.");
    };
    cpu.latch(vector);
    check_pending();
}

/// Delivers pending interrupts if the current context can take them.
pub fn check_pending() {
    if LEVEL.with(Cell::get) != Ipl::Low || in_interrupt() {
        return;
    }
    let Some(cpu) = Processor::current() else {
        return;
    };
    if cpu.power() != Power::On {
        return;
    }
    while let Some(vector) = cpu.take_pending() {
        dispatch(&cpu, vector);
    }
}

/// Delivers every pending interrupt whatever the current level is, and
/// returns whether any was delivered.
///
/// This is what an idle processor does: the context that leaves it has
/// nothing to run and waits with interrupts enabled, whatever level that
/// context itself saved. The level of the caller is unchanged on return.
pub fn deliver_pending() -> bool {
    assert!(!in_interrupt(), "Idle delivery inside an interrupt handler.");
    let Some(cpu) = Processor::current() else {
        return false;
    };
    let mut delivered = false;
    while cpu.power() == Power::On {
        let Some(vector) = cpu.take_pending() else {
            break;
        };
        dispatch(&cpu, vector);
        delivered = true;
    }
    delivered
}

/// Restores the interrupted context's state when a handler returns, even by
/// unwinding.
struct HandlerFrame {
    level: Ipl,
}

impl Drop for HandlerFrame {
    fn drop(&mut self) {
        IN_INTERRUPT.with(|f| f.set(false));
        LEVEL.with(|l| l.set(self.level));
    }
}

fn dispatch(cpu: &Processor, vector: usize) {
    let _frame = HandlerFrame { level: splhigh() };
    IN_INTERRUPT.with(|f| f.set(true));
    (cpu.entry())(vector);
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, the priority level is raised to
/// [`Ipl::High`]. When it is dropped, the level is restored to what it was
/// before the guard was created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field.
///
/// The guard is neither [`Send`] nor [`Sync`]; it belongs to the context that
/// created it, as does a [`SpinLockGuard`].
///
/// This structure is created using [`InterruptGuard::new`].
pub struct InterruptGuard {
    prior: Ipl,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// # Example
    /// ```ignore
    /// let _guard = InterruptGuard::new(); // Disables interrupts
    /// // Critical section...
    /// // Interrupts are restored when `_guard` goes out of scope.
    /// ```
    pub fn new() -> Self {
        let depth = DEPTH.with(|d| d.replace(d.get() + 1));
        Self {
            prior: splhigh(),
            depth,
            _not_send: PhantomData,
        }
    }

    /// Whether any `InterruptGuard` of the current context is alive.
    pub fn is_guarded() -> bool {
        DEPTH.with(Cell::get) > 0
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let depth = DEPTH.with(Cell::get);
        assert!(
            depth == self.depth + 1,
            "Mismatched InterruptGuard drop calls: {depth}"
        );
        DEPTH.with(|d| d.set(self.depth));
        splx(self.prior);
    }
}
