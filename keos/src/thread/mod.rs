//! Thread abstration, an abstraction of an execution context.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads that share one
//! processor. Only one thread runs at a time; the others are either waiting in
//! the run queue of the [`Scheduler`] or parked on a [`WaitChannel`].
//!
//! A thread leaves the processor in exactly three ways:
//!
//! | Operation                | The thread becomes | It runs again when                 |
//! |--------------------------|--------------------|------------------------------------|
//! | [`Current::sleep_on`]    | `Parked`           | its channel is woken up            |
//! | [`Current::yield_now`]   | `Runnable`         | the scheduler picks it             |
//! | [`Current::exit`]        | `Exited`           | never                              |
//!
//! ## Sleeping and waking up
//!
//! A channel pairs a sleep with the wakeup meant for it. Kernel objects
//! allocate their own channel with [`WaitChannel::new`], and every thread owns
//! the channel [`WaitChannel::of`] its [`Tid`], which lets a waker target one
//! specific thread.
//!
//! Checking a condition and going to sleep must be atomic with respect to the
//! wakeup, or the wakeup can slip in between and get lost. Therefore
//! [`Current::sleep_on`] requires interrupts to be masked by the caller,
//! typically with an [`InterruptGuard`] that covers both the check and the
//! sleep:
//!
//! ```ignore
//! let guard = InterruptGuard::new();
//! while !ready() {
//!     Current::sleep_on(chan);
//! }
//! drop(guard);
//! ```
//!
//! The interrupt level belongs to the sleeping thread: while it is parked,
//! other threads run with their own level, and it wakes up with the level it
//! slept with.
pub mod scheduler;

use crate::{KernelError, spinlock::SpinLock};
use abyss::{
    cpu::{Power, Processor},
    interrupt::{
        InterruptGuard, InterruptState, check_pending, deliver_pending, in_interrupt, splhigh,
    },
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use scheduler::Scheduler;
use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering},
    },
};

/// Identity of a thread.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Tid(u64);

impl Tid {
    /// The raw thread id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Tid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

const BOOT_TID: Tid = Tid(0);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
enum Key {
    Object(u64),
    Thread(Tid),
    Join(Tid),
}

/// An opaque identity that pairs a sleep with its wakeup.
///
/// Two channels are equal only if they were copied from the same
/// [`WaitChannel::new`] call, or if both are [`WaitChannel::of`] the same
/// thread.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WaitChannel(Key);

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(0);

impl WaitChannel {
    /// Allocates a channel no other object uses.
    pub fn new() -> Self {
        Self(Key::Object(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed)))
    }

    /// The channel of the thread `tid`.
    pub fn of(tid: Tid) -> Self {
        Self(Key::Thread(tid))
    }

    fn join(tid: Tid) -> Self {
        Self(Key::Join(tid))
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is parked on a wait channel.
    Parked,
    /// Thread is exited.
    Exited,
}

/// Unwinding payload that releases the thread of a powered-off kernel.
struct Halt;

/// Unwinding payload of [`Current::exit`].
struct Exit(i32);

/// A thread of the kernel.
pub struct Thread {
    /// Thread id.
    pub tid: Tid,
    /// Thread name.
    pub name: String,
    state: AtomicU8,
    exit_code: AtomicI32,
    kernel: Arc<Kernel>,
}

impl Thread {
    /// State of the thread.
    pub fn state(&self) -> ThreadState {
        let raw = self.state.load(Ordering::SeqCst);
        match ThreadState::try_from(raw) {
            Ok(state) => state,
            Err(_) => unreachable!("Corrupted thread state: {raw}"),
        }
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    fn exit_code(&self) -> Option<i32> {
        (self.state() == ThreadState::Exited).then(|| self.exit_code.load(Ordering::SeqCst))
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.kernel.cpu.power() != Power::On
    }
}

pub(crate) type Handler = Arc<dyn Fn(usize) + Send + Sync>;

pub(crate) struct Kernel {
    cpu: Arc<Processor>,
    scheduler: Box<dyn Scheduler>,
    sleepers: SpinLock<BTreeMap<WaitChannel, VecDeque<Arc<Thread>>>>,
    threads: SpinLock<BTreeMap<Tid, Arc<Thread>>>,
    pub(crate) handlers: SpinLock<BTreeMap<usize, Handler>>,
    next_tid: AtomicU64,
}

impl Kernel {
    fn new(scheduler: Box<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            cpu: Processor::new(BOOT_TID.0, crate::interrupt::do_handle_interrupt),
            scheduler,
            sleepers: SpinLock::new(BTreeMap::new()),
            threads: SpinLock::new(BTreeMap::new()),
            handlers: SpinLock::new(BTreeMap::new()),
            next_tid: AtomicU64::new(BOOT_TID.0 + 1),
        })
    }

    fn register(&self, th: &Arc<Thread>) {
        let mut threads = self.threads.lock();
        threads.insert(th.tid, th.clone());
        threads.unlock();
    }

    fn wakeup(&self, chan: WaitChannel) {
        let _guard = InterruptGuard::new();
        let mut sleepers = self.sleepers.lock();
        let woken = sleepers.remove(&chan);
        sleepers.unlock();
        for th in woken.into_iter().flatten() {
            // A sleeper unwound by a panicking interrupt handler is gone.
            if th.state() == ThreadState::Exited {
                continue;
            }
            th.set_state(ThreadState::Runnable);
            self.scheduler.push_to_queue(th);
        }
    }

    fn has_sleepers(&self, chan: WaitChannel) -> bool {
        let sleepers = self.sleepers.lock();
        let found = sleepers.get(&chan).is_some_and(|q| !q.is_empty());
        sleepers.unlock();
        found
    }

    fn anyone_sleeping(&self) -> bool {
        let sleepers = self.sleepers.lock();
        let found = !sleepers.is_empty();
        sleepers.unlock();
        found
    }

    /// Gives the processor to the next runnable thread and waits until
    /// `current` gets it back.
    ///
    /// `current` must already be queued, parked or exited. When nothing is
    /// runnable, the processor idles and delivers the pending interrupts
    /// before a deadlock is declared.
    fn reschedule(&self, current: &Arc<Thread>) {
        loop {
            match self.scheduler.next_to_run() {
                Some(next) if next.tid == current.tid => {
                    current.set_state(ThreadState::Running);
                    return;
                }
                Some(next) => {
                    next.set_state(ThreadState::Running);
                    self.cpu.run(next.tid.0);
                }
                // Idle: pending interrupts may make a sleeper runnable.
                None if deliver_pending() => continue,
                None if self.anyone_sleeping() => {
                    warning!("Deadlock: every thread is parked and none is runnable.");
                    self.cpu.halt(Power::Wedged);
                }
                None => self.cpu.idle(),
            }
            break;
        }

        if current.state() == ThreadState::Exited {
            return;
        }
        match self.cpu.wait_for(current.tid.0) {
            Ok(()) => (),
            Err(Power::Wedged) if current.tid == BOOT_TID => panic!(
                "Deadlock detected: thread `{}` would sleep forever.",
                current.name
            ),
            Err(_) => panic::resume_unwind(Box::new(Halt)),
        }
    }

    /// Powers off the processor and forgets every thread.
    fn shutdown(&self) {
        let mut sleepers = self.sleepers.lock();
        let parked = core::mem::take(&mut *sleepers);
        sleepers.unlock();
        let mut threads = self.threads.lock();
        let alive = core::mem::take(&mut *threads);
        threads.unlock();
        while self.scheduler.next_to_run().is_some() {}

        self.cpu.halt(Power::Halted);

        let mut handlers = self.handlers.lock();
        let installed = core::mem::take(&mut *handlers);
        handlers.unlock();
        drop((parked, alive, installed));
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

fn install(th: Option<Arc<Thread>>) {
    CURRENT.with(|current| *current.borrow_mut() = th);
}

pub(crate) fn try_current() -> Option<Arc<Thread>> {
    CURRENT.with(|current| current.borrow().clone())
}

fn current() -> Arc<Thread> {
    match try_current() {
        Some(th) => th,
        None => panic!("Not running on a kernel thread."),
    }
}

/// Run a function `f` with current thread as an argument.
pub fn with_current<R>(f: impl FnOnce(&Thread) -> R) -> R {
    f(&current())
}

/// A struct to handle the current thread.
pub struct Current {
    _p: (),
}

impl Current {
    /// Get current thread's id.
    pub fn get_tid() -> Tid {
        with_current(|th| th.tid)
    }

    /// Parks the current thread on `chan` until the channel is woken up.
    ///
    /// Interrupts must be masked by the caller, and stay masked for the
    /// thread when it resumes. Sleeping in an interrupt handler is fatal.
    pub fn sleep_on(chan: WaitChannel) {
        assert!(!in_interrupt(), "May not sleep in an interrupt handler.");
        assert_eq!(
            InterruptState::current(),
            InterruptState::Off,
            "Interrupts must be masked before going to sleep."
        );
        let th = current();
        let kernel = th.kernel.clone();
        th.set_state(ThreadState::Parked);
        let mut sleepers = kernel.sleepers.lock();
        sleepers.entry(chan).or_default().push_back(th.clone());
        sleepers.unlock();
        kernel.reschedule(&th);
    }

    /// Lets the other runnable threads run before the current one continues.
    ///
    /// Yielding with interrupts masked is fatal.
    pub fn yield_now() {
        assert!(!in_interrupt(), "May not yield in an interrupt handler.");
        assert!(
            InterruptState::current() == InterruptState::On,
            "Try to reschedule a thread while holding a lock."
        );
        let th = current();
        let kernel = th.kernel.clone();
        th.set_state(ThreadState::Runnable);
        kernel.scheduler.push_to_queue(th.clone());
        kernel.reschedule(&th);
        check_pending();
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The boot thread cannot exit; it ends by returning from the closure
    /// given to [`crate::boot`].
    pub fn exit(exit_code: i32) -> ! {
        assert_ne!(
            Current::get_tid(),
            BOOT_TID,
            "The boot thread may not exit."
        );
        panic::resume_unwind(Box::new(Exit(exit_code)))
    }
}

/// Wakes up every thread parked on `chan`.
///
/// The woken threads become runnable; the caller keeps running.
pub fn wakeup(chan: WaitChannel) {
    with_current(|th| th.kernel.wakeup(chan))
}

/// Wakes up the thread `tid` if it is parked on its own channel.
pub fn wakeup_one(tid: Tid) {
    wakeup(WaitChannel::of(tid))
}

/// Whether any thread is parked on `chan`.
///
/// Outside of a kernel nobody can sleep, so this is `false` there.
pub fn has_sleepers(chan: WaitChannel) -> bool {
    try_current().is_some_and(|th| th.kernel.has_sleepers(chan))
}

/// Get the state of the thread `tid`.
///
/// # Errors
///
/// [`KernelError::InvalidArgument`] if no live thread has the id `tid`.
pub fn get_state_by_tid(tid: Tid) -> Result<ThreadState, KernelError> {
    with_current(|th| {
        let threads = th.kernel.threads.lock();
        let state = threads.get(&tid).map(|th| th.state());
        threads.unlock();
        state.ok_or(KernelError::InvalidArgument)
    })
}

/// A handle to join a thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: Tid,
    th: Arc<Thread>,
}

impl JoinHandle {
    /// Join this handle.
    ///
    /// Blocks until the thread exits and returns its exit code: `0` when the
    /// thread function returned, `-1` when it panicked.
    pub fn join(self) -> i32 {
        let _guard = InterruptGuard::new();
        loop {
            if let Some(code) = self.th.exit_code() {
                return code;
            }
            Current::sleep_on(WaitChannel::join(self.tid));
        }
    }

    /// State of the thread.
    pub fn state(&self) -> ThreadState {
        self.th.state()
    }

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.state() == ThreadState::Exited
    }
}

/// A builder for a thread.
pub struct ThreadBuilder {
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
        }
    }

    /// Spawn the thread as a runnable.
    ///
    /// The new thread runs once the current thread leaves the processor.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let kernel = with_current(|th| th.kernel.clone());
        let th = Arc::new(Thread {
            tid: Tid(kernel.next_tid.fetch_add(1, Ordering::SeqCst)),
            name: self.name,
            state: AtomicU8::new(ThreadState::Runnable.into()),
            exit_code: AtomicI32::new(0),
            kernel: kernel.clone(),
        });
        kernel.register(&th);

        let started = th.clone();
        if let Err(e) = std::thread::Builder::new()
            .name(th.name.clone())
            .spawn(move || start(started, thread_fn))
        {
            panic!("Failed to spawn thread `{}`: {e}", th.name);
        }
        kernel.scheduler.push_to_queue(th.clone());

        JoinHandle { tid: th.tid, th }
    }
}

fn start<F: FnOnce()>(th: Arc<Thread>, thread_fn: F) {
    th.kernel.cpu.attach();
    install(Some(th.clone()));
    if th.kernel.cpu.wait_for(th.tid.0).is_ok() {
        check_pending();
        let exit_code = match panic::catch_unwind(AssertUnwindSafe(thread_fn)) {
            Ok(()) => Some(0),
            Err(payload) if payload.is::<Halt>() => None,
            Err(payload) => Some(payload.downcast::<Exit>().map_or(-1, |exit| exit.0)),
        };
        if let Some(exit_code) = exit_code {
            finish(&th, exit_code);
        }
    }
    install(None);
    Processor::detach();
}

fn finish(th: &Arc<Thread>, exit_code: i32) {
    // An exited thread never lowers the level again.
    splhigh();
    let kernel = th.kernel.clone();
    th.exit_code.store(exit_code, Ordering::SeqCst);
    th.set_state(ThreadState::Exited);
    let mut threads = kernel.threads.lock();
    threads.remove(&th.tid);
    threads.unlock();
    debug!("Thread `{}` ({}) exited with {exit_code}.", th.name, th.tid);
    kernel.wakeup(WaitChannel::join(th.tid));
    kernel.reschedule(th);
}

pub(crate) fn boot<R>(scheduler: Box<dyn Scheduler>, f: impl FnOnce() -> R) -> R {
    assert!(
        try_current().is_none(),
        "A kernel is already running on this thread."
    );
    let kernel = Kernel::new(scheduler);
    let th = Arc::new(Thread {
        tid: BOOT_TID,
        name: String::from("main"),
        state: AtomicU8::new(ThreadState::Running.into()),
        exit_code: AtomicI32::new(0),
        kernel: kernel.clone(),
    });
    kernel.register(&th);
    kernel.cpu.attach();
    install(Some(th));

    let result = panic::catch_unwind(AssertUnwindSafe(f));

    kernel.shutdown();
    install(None);
    Processor::detach();
    result.unwrap_or_else(|payload| panic::resume_unwind(payload))
}
