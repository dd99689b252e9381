//! The abyss of kernel that operates hardwares.
//!
//! This crate contains the emulated machine the kernel runs on: a single
//! processor that is handed from one execution context to another, the
//! interrupt priority level of that processor, and a serial console.
//!
//! Every execution context is backed by a host thread, but only the context
//! that owns the [`Processor`] executes. The interrupt priority level is part
//! of the state each context saves on a switch, exactly like the interrupt
//! flag of a real processor.
//!
//! You are **not** required to understand every line of code in this crate.
//! Instead, you are supposed to see [`keos`] crate to see which modules (or
//! functions) are available for implementing kernel services.
//!
//! [`keos`]: ../keos/index.html
//! [`Processor`]: cpu::Processor

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod cpu;
pub mod interrupt;
pub mod spinlock;

/// Number of interrupt lines of the processor.
pub const NUM_IRQ: usize = 64;
