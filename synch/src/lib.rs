//! # Blocking synchronization primitives
//!
//! This crate implements the three blocking synchronization primitives of the
//! kernel on top of the two non-blocking mechanisms [`keos`] provides: sleeping
//! on a [`WaitChannel`] and masking interrupts with an [`InterruptGuard`].
//!
//! - [`Semaphore`]: a counting resource gate.
//! - [`Lock`]: reentrant mutual exclusion.
//! - [`ConditionVariable`]: a rendezvous point used together with a [`Lock`].
//!
//! See [`sync`] for how they are built.
//!
//! ## Features
//!
//! - `strict_release`: releasing a [`Lock`] the caller does not hold is fatal.
//!   Without it, such a release is reported on the console and ignored.
//!
//! [`WaitChannel`]: keos::thread::WaitChannel
//! [`InterruptGuard`]: keos::interrupt::InterruptGuard
//! [`Semaphore`]: sync::Semaphore
//! [`Lock`]: sync::Lock
//! [`ConditionVariable`]: sync::ConditionVariable

#![no_std]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod sync;
