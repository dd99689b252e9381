//! The emulated uniprocessor.
//!
//! Each execution context of the kernel is a host thread that is attached to
//! a [`Processor`], and the processor is owned by exactly one of them at a
//! time. A context gives the processor away with [`Processor::run`] and then
//! waits in [`Processor::wait_for`] until somebody hands it back.
//!
//! Interrupt lines are latched in the processor and delivered to whichever
//! context owns it once that context runs with interrupts unmasked. See
//! [`crate::interrupt`].

use crate::NUM_IRQ;
use parking_lot::{Condvar, Mutex};
use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Power state of a [`Processor`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Power {
    /// The processor executes contexts.
    On,
    /// The processor was shut down.
    Halted,
    /// The processor stopped because no context can ever run again.
    Wedged,
}

struct CpuState {
    running: Option<u64>,
    power: Power,
}

/// A single processor shared by every execution context of a kernel.
pub struct Processor {
    state: Mutex<CpuState>,
    turn: Condvar,
    pending: AtomicU64,
    entry: fn(usize),
}

thread_local! {
    static ATTACHED: RefCell<Option<Arc<Processor>>> = const { RefCell::new(None) };
}

impl Processor {
    /// Powers on a processor owned by the context `boot`.
    ///
    /// `entry` is the kernel's interrupt entry point, called with the vector
    /// of every delivered interrupt.
    pub fn new(boot: u64, entry: fn(usize)) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CpuState {
                running: Some(boot),
                power: Power::On,
            }),
            turn: Condvar::new(),
            pending: AtomicU64::new(0),
            entry,
        })
    }

    /// Attaches the calling host thread to this processor.
    pub fn attach(self: &Arc<Self>) {
        ATTACHED.with(|cpu| *cpu.borrow_mut() = Some(self.clone()));
    }

    /// Detaches the calling host thread from its processor.
    pub fn detach() {
        ATTACHED.with(|cpu| cpu.borrow_mut().take());
    }

    /// The processor the calling host thread is attached to.
    pub fn current() -> Option<Arc<Self>> {
        ATTACHED.with(|cpu| cpu.borrow().clone())
    }

    /// Hands the processor to the context `next`.
    pub fn run(&self, next: u64) {
        let mut state = self.state.lock();
        state.running = Some(next);
        self.turn.notify_all();
    }

    /// Leaves the processor without an owner.
    pub fn idle(&self) {
        self.state.lock().running = None;
    }

    /// Blocks until the processor is handed to the context `me`.
    ///
    /// # Errors
    ///
    /// Returns the power state if the processor stops before `me` gets to
    /// run.
    pub fn wait_for(&self, me: u64) -> Result<(), Power> {
        let mut state = self.state.lock();
        loop {
            if state.power != Power::On {
                return Err(state.power);
            }
            if state.running == Some(me) {
                return Ok(());
            }
            self.turn.wait(&mut state);
        }
    }

    /// Stops the processor and releases every waiting context.
    pub fn halt(&self, power: Power) {
        assert_ne!(power, Power::On, "Halting a processor into `On` state.");
        let mut state = self.state.lock();
        state.power = power;
        state.running = None;
        self.turn.notify_all();
    }

    /// The power state of the processor.
    pub fn power(&self) -> Power {
        self.state.lock().power
    }

    /// The context that owns the processor.
    pub fn running(&self) -> Option<u64> {
        self.state.lock().running
    }

    pub(crate) fn latch(&self, vector: usize) {
        assert!(vector < NUM_IRQ, "Invalid interrupt vector: {vector}");
        self.pending.fetch_or(1 << vector, Ordering::SeqCst);
    }

    /// Takes the lowest pending interrupt line.
    pub(crate) fn take_pending(&self) -> Option<usize> {
        let mut pending = self.pending.load(Ordering::SeqCst);
        loop {
            if pending == 0 {
                return None;
            }
            let vector = pending.trailing_zeros() as usize;
            match self.pending.compare_exchange(
                pending,
                pending & !(1 << vector),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(vector),
                Err(now) => pending = now,
            }
        }
    }

    pub(crate) fn entry(&self) -> fn(usize) {
        self.entry
    }
}
