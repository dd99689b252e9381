//! Kernel print utilities.
//!
//! The serial console of the emulated machine is the standard error stream of
//! the host.

use crate::spinlock::SpinLock;
use core::{
    fmt::Write,
    sync::atomic::{AtomicU8, Ordering},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Verbosity of the kernel console.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum LogLevel {
    /// Only `print!` and `println!` reach the console.
    Quiet = 0,
    /// `info!` and `warning!` messages are shown.
    Info = 1,
    /// Everything, including `debug!` messages, is shown.
    Debug = 2,
}

const UNSET: u8 = u8::MAX;
static LEVEL: AtomicU8 = AtomicU8::new(UNSET);

impl LogLevel {
    /// Reads the level from the `KEOS_LOG` environment variable.
    ///
    /// Accepts `quiet`, `info` and `debug`. Anything else means
    /// [`LogLevel::Info`].
    pub fn from_env() -> Self {
        match std::env::var("KEOS_LOG").as_deref() {
            Ok("quiet") => Self::Quiet,
            Ok("debug") => Self::Debug,
            _ => Self::Info,
        }
    }

    /// The level in effect.
    pub fn current() -> Self {
        match Self::try_from(LEVEL.load(Ordering::Relaxed)) {
            Ok(level) => level,
            Err(_) => {
                let level = Self::from_env();
                LEVEL.store(level.into(), Ordering::Relaxed);
                level
            }
        }
    }

    /// Makes this level the one in effect.
    pub fn apply(self) {
        LEVEL.store(self.into(), Ordering::Relaxed);
    }
}

/// The COM1 serial port.
pub struct Com1Sink {
    _p: (),
}

impl Com1Sink {
    /// Create a sink for the serial port.
    pub const fn new() -> Self {
        Self { _p: () }
    }
}

impl Default for Com1Sink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Com1Sink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        eprint!("{s}");
        Ok(())
    }
}

static SERIAL: SpinLock<Com1Sink> = SpinLock::new(Com1Sink::new());

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let mut guard = SERIAL.lock();
    let _ = write!(&mut *guard, "{fmt}");
    guard.unlock();
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! info {
    () => (if $crate::kprint::LogLevel::current() >= $crate::kprint::LogLevel::Info { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if $crate::kprint::LogLevel::current() >= $crate::kprint::LogLevel::Info { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! warning {
    () => (if $crate::kprint::LogLevel::current() >= $crate::kprint::LogLevel::Info { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if $crate::kprint::LogLevel::current() >= $crate::kprint::LogLevel::Info { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! debug {
    () => (if $crate::kprint::LogLevel::current() >= $crate::kprint::LogLevel::Debug { $crate::print!("[DEBUG]\n") });
    ($($arg:tt)*) => (if $crate::kprint::LogLevel::current() >= $crate::kprint::LogLevel::Debug { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*)) });
}
