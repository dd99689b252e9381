//! Thread scheduler

use super::Thread;
use crossbeam_queue::SegQueue;
use std::sync::Arc;

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. It provides an interface for managing runnable threads
/// and determining which thread to run next. The kernel consults the scheduler
/// whenever the running thread leaves the processor.
///
/// This trait can be implemented by different types of schedulers, such as
/// Round Robin, Priority-based, or Multi-level Queue schedulers. Each
/// implementation may have a unique strategy for selecting the next
/// thread to run.
pub trait Scheduler: Send + Sync {
    /// Peek a next thread to run.
    ///
    /// This method checks the queue and returns the next thread to run. If no
    /// threads are available, it returns `None`.
    fn next_to_run(&self) -> Option<Arc<Thread>>;

    /// Push a thread `th` into scheduling queue.
    ///
    /// This method adds the specified thread to the queue of threads waiting to
    /// be scheduled.
    fn push_to_queue(&self, th: Arc<Thread>);
}

/// A First-in-first-out scheduler.
#[derive(Default)]
pub struct Fifo {
    runqueue: SegQueue<Arc<Thread>>,
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        self.runqueue.pop()
    }

    fn push_to_queue(&self, th: Arc<Thread>) {
        self.runqueue.push(th);
    }
}
