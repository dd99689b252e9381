//! # KeOS: the kernel substrate
//!
//! This crate is the small kernel that blocking synchronization primitives are
//! built on. It provides exactly two low-level, non-blocking mechanisms:
//!
//! - A **sleep/wakeup channel scheduler** ([`thread`]): an execution context
//!   parks itself on an opaque [`WaitChannel`] and stays parked until somebody
//!   wakes that channel up.
//! - An **interrupt priority mask** ([`interrupt`]): raising the priority level
//!   makes a short state update atomic with respect to both context switches
//!   and interrupt handlers on the processor.
//!
//! The kernel runs on a single emulated processor supplied by [`abyss`].
//! There is no timer preemption: a thread leaves the processor only when it
//! sleeps, yields, or exits.
//!
//! ## Booting
//!
//! [`boot`] turns the calling host thread into the boot thread of a fresh
//! kernel and runs the given closure on it. When the closure returns, the
//! processor is powered off and every thread still parked is discarded.
//!
//! ```ignore
//! keos::SystemConfigurationBuilder::new()
//!     .log_level(keos::LogLevel::Debug)
//!     .boot(|| {
//!         let child = keos::thread::ThreadBuilder::new("child").spawn(|| {
//!             keos::info!("Hello from a kernel thread.");
//!         });
//!         assert_eq!(child.join(), 0);
//!     });
//! ```
//!
//! ## Failures
//!
//! Recoverable failures are reported with [`KernelError`]. Broken invariants
//! and misuse of the kernel interfaces are fatal: they panic, and a panicking
//! kernel thread exits with `-1`. A kernel in which every thread sleeps
//! forever is detected and the boot thread panics with a deadlock report.
//!
//! [`WaitChannel`]: thread::WaitChannel

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate abyss;

pub mod interrupt;
pub mod sync;
pub mod thread;

use abyss::spinlock;
pub use abyss::{debug, info, kprint::LogLevel, print, println, warning};
use std::collections::TryReserveError;
use thread::scheduler::{Fifo, Scheduler};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// during the handling of a kernel operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

impl From<TryReserveError> for KernelError {
    fn from(_: TryReserveError) -> Self {
        KernelError::NoMemory
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::NoMemory => write!(f, "out of memory"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for KernelError {}

/// Whether the current thread is unwinding.
///
/// Drop handlers use this to skip consistency checks that would turn an
/// ongoing panic into an abort.
pub fn panicking() -> bool {
    std::thread::panicking()
}

/// Whether the processor of the current thread was powered off.
///
/// Threads of a powered-off kernel are unwound without ever running again;
/// they must not touch kernel objects on their way out.
pub fn halted() -> bool {
    thread::try_current().is_some_and(|th| th.is_halted())
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring system-wide settings before the kernel boots, such as the
/// scheduling policy and the verbosity of the console.
pub struct SystemConfigurationBuilder {
    scheduler: Box<dyn Scheduler>,
    log_level: Option<LogLevel>,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Starts from the default configuration: a [`Fifo`] scheduler and the
    /// log level of the `KEOS_LOG` environment variable.
    pub fn new() -> Self {
        Self {
            scheduler: Box::new(Fifo::default()),
            log_level: None,
        }
    }

    /// Sets the system-wide scheduler.
    ///
    /// It is expected that the provided scheduler implements the
    /// [`Scheduler`] trait and has a `'static` lifetime, meaning it must
    /// outlive all references.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// Sets the verbosity of the console.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Boots a kernel with this configuration and runs `f` as its boot
    /// thread.
    ///
    /// Returns what `f` returns. A panic of `f` is propagated after the
    /// kernel has been powered off.
    pub fn boot<R>(self, f: impl FnOnce() -> R) -> R {
        if let Some(level) = self.log_level {
            level.apply();
        }
        thread::boot(self.scheduler, f)
    }
}

/// Boots a kernel with the default configuration and runs `f` as its boot
/// thread.
pub fn boot<R>(f: impl FnOnce() -> R) -> R {
    SystemConfigurationBuilder::new().boot(f)
}
