use grading::{kernel_test, wait_until};
use keos::{
    SystemConfigurationBuilder,
    interrupt::{InterruptGuard, InterruptState},
    sync::SpinLock,
    thread::{Current, JoinHandle, Thread, ThreadBuilder, ThreadState, scheduler::Scheduler},
};
use keos_synch::sync::{ConditionVariable, Lock, Semaphore};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Runs the most recently queued thread first.
#[derive(Default)]
struct Lifo {
    stack: SpinLock<Vec<Arc<Thread>>>,
}

impl Scheduler for Lifo {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        let mut stack = self.stack.lock();
        let th = stack.pop();
        stack.unlock();
        th
    }

    fn push_to_queue(&self, th: Arc<Thread>) {
        let mut stack = self.stack.lock();
        stack.push(th);
        stack.unlock();
    }
}

struct Rendezvous {
    lock: Lock,
    cv: ConditionVariable,
    ready: Semaphore,
    woken: SpinLock<Vec<&'static str>>,
}

impl Rendezvous {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: Lock::new("rendezvous").unwrap(),
            cv: ConditionVariable::new("rendezvous").unwrap(),
            ready: Semaphore::new("ready", 0).unwrap(),
            woken: SpinLock::new(Vec::new()),
        })
    }

    /// Spawns a thread that waits on the condition variable, and returns once
    /// the thread is queued.
    fn spawn_waiter(self: &Arc<Self>, name: &'static str) -> JoinHandle {
        let this = self.clone();
        let handle = ThreadBuilder::new(name).spawn(move || {
            this.lock.acquire();
            this.ready.signal();
            this.cv.wait(&this.lock);
            assert!(this.lock.do_i_hold());
            let mut woken = this.woken.lock();
            woken.push(name);
            woken.unlock();
            this.lock.release();
        });
        self.ready.wait();
        handle
    }

    fn signal(&self) {
        self.lock.acquire();
        self.cv.signal(&self.lock);
        self.lock.release();
    }

    fn woken(&self) -> Vec<&'static str> {
        let woken = self.woken.lock();
        let names = woken.clone();
        woken.unlock();
        names
    }
}

fn signal_wakes_in_wait_order() {
    let rdv = Rendezvous::new();
    let a = rdv.spawn_waiter("a");
    let b = rdv.spawn_waiter("b");
    assert_eq!(rdv.cv.waiters(), 2);

    rdv.signal();
    assert_eq!(a.join(), 0);
    assert_eq!(rdv.woken(), ["a"]);
    assert_eq!(b.state(), ThreadState::Parked);
    assert_eq!(rdv.cv.waiters(), 1);

    rdv.signal();
    assert_eq!(b.join(), 0);
    assert_eq!(rdv.woken(), ["a", "b"]);
}

#[test]
#[kernel_test]
fn signal_is_fifo() {
    signal_wakes_in_wait_order();
}

#[test]
fn signal_is_fifo_under_lifo_scheduler() {
    SystemConfigurationBuilder::new()
        .set_scheduler(Lifo::default())
        .boot(signal_wakes_in_wait_order);
}

#[test]
#[kernel_test]
fn signal_without_waiters_is_noop() {
    let lock = Lock::new("lock").unwrap();
    let cv = ConditionVariable::new("idle").unwrap();
    lock.acquire();
    cv.signal(&lock);
    cv.broadcast(&lock);
    assert!(lock.do_i_hold());
    lock.release();
    assert_eq!(cv.waiters(), 0);
}

#[test]
#[kernel_test]
fn broadcast_drains_every_waiter() {
    const WAITERS: usize = 5;
    let rdv = Rendezvous::new();
    let waiters = ["w0", "w1", "w2", "w3", "w4"].map(|name| rdv.spawn_waiter(name));
    assert_eq!(rdv.cv.waiters(), WAITERS);

    rdv.lock.acquire();
    rdv.cv.broadcast(&rdv.lock);
    assert_eq!(rdv.cv.waiters(), 0);
    rdv.lock.release();

    for waiter in waiters {
        assert_eq!(waiter.join(), 0);
    }
    assert_eq!(rdv.woken(), ["w0", "w1", "w2", "w3", "w4"]);
}

#[test]
#[kernel_test]
fn wait_restores_reentrant_holds() {
    let rdv = Rendezvous::new();
    let waiter = {
        let rdv = rdv.clone();
        ThreadBuilder::new("deep").spawn(move || {
            rdv.lock.acquire();
            rdv.lock.acquire();
            rdv.ready.signal();
            rdv.cv.wait(&rdv.lock);
            rdv.lock.release();
            assert!(rdv.lock.do_i_hold());
            rdv.lock.release();
            assert!(!rdv.lock.do_i_hold());
        })
    };
    rdv.ready.wait();

    // The waiter gave up both holds while it sleeps.
    assert_eq!(rdv.lock.holder(), None);
    rdv.signal();
    assert_eq!(waiter.join(), 0);
    assert_eq!(rdv.lock.holder(), None);
}

#[test]
#[kernel_test]
fn waiter_reacquires_after_signaler_releases() {
    let rdv = Rendezvous::new();
    let waiter = rdv.spawn_waiter("late");

    rdv.lock.acquire();
    rdv.cv.signal(&rdv.lock);
    // Woken, but the lock is still ours.
    wait_until(|| waiter.state() == ThreadState::Parked);
    Current::yield_now();
    assert!(rdv.woken().is_empty());
    rdv.lock.release();

    assert_eq!(waiter.join(), 0);
    assert_eq!(rdv.woken(), ["late"]);
}

#[test]
#[should_panic(expected = "wait without holding lock `lock`")]
#[kernel_test]
fn wait_without_lock_is_fatal() {
    let lock = Lock::new("lock").unwrap();
    let cv = ConditionVariable::new("cv").unwrap();
    cv.wait(&lock);
}

#[test]
#[should_panic(expected = "signal without holding lock `lock`")]
#[kernel_test]
fn signal_without_lock_is_fatal() {
    let lock = Lock::new("lock").unwrap();
    let cv = ConditionVariable::new("cv").unwrap();
    cv.signal(&lock);
}

#[test]
#[should_panic(expected = "broadcast without holding lock `lock`")]
#[kernel_test]
fn broadcast_with_lock_of_other_thread_is_fatal() {
    let lock = Arc::new(Lock::new("lock").unwrap());
    let cv = ConditionVariable::new("cv").unwrap();
    let owner = {
        let lock = lock.clone();
        ThreadBuilder::new("owner").spawn(move || lock.acquire())
    };
    assert_eq!(owner.join(), 0);
    assert!(lock.holder().is_some());
    cv.broadcast(&lock);
}

#[test]
#[kernel_test]
fn wait_keeps_the_interrupt_level_of_the_caller() {
    let rdv = Rendezvous::new();
    let masked = {
        let rdv = rdv.clone();
        ThreadBuilder::new("masked").spawn(move || {
            let guard = InterruptGuard::new();
            rdv.lock.acquire();
            rdv.ready.signal();
            rdv.cv.wait(&rdv.lock);
            assert_eq!(InterruptState::current(), InterruptState::Off);
            rdv.lock.release();
            assert_eq!(InterruptState::current(), InterruptState::Off);
            drop(guard);
            assert_eq!(InterruptState::current(), InterruptState::On);
        })
    };
    rdv.ready.wait();
    let unmasked = {
        let rdv = rdv.clone();
        ThreadBuilder::new("unmasked").spawn(move || {
            rdv.lock.acquire();
            rdv.ready.signal();
            rdv.cv.wait(&rdv.lock);
            assert_eq!(InterruptState::current(), InterruptState::On);
            rdv.lock.release();
        })
    };
    rdv.ready.wait();
    assert_eq!(rdv.cv.waiters(), 2);

    rdv.lock.acquire();
    rdv.cv.broadcast(&rdv.lock);
    rdv.lock.release();
    assert_eq!(InterruptState::current(), InterruptState::On);

    assert_eq!(masked.join(), 0);
    assert_eq!(unmasked.join(), 0);
}

const CAPACITY: usize = 2;

struct Buffer {
    lock: Lock,
    not_full: ConditionVariable,
    not_empty: ConditionVariable,
    items: SpinLock<VecDeque<usize>>,
}

impl Buffer {
    fn len(&self) -> usize {
        let items = self.items.lock();
        let len = items.len();
        items.unlock();
        len
    }

    fn put(&self, val: usize) {
        let _held = self.lock.hold();
        while self.len() == CAPACITY {
            self.not_full.wait(&self.lock);
        }
        let mut items = self.items.lock();
        items.push_back(val);
        items.unlock();
        self.not_empty.signal(&self.lock);
    }

    fn get(&self) -> usize {
        let _held = self.lock.hold();
        while self.len() == 0 {
            self.not_empty.wait(&self.lock);
        }
        let mut items = self.items.lock();
        let item = items.pop_front();
        items.unlock();
        self.not_full.signal(&self.lock);
        item.unwrap()
    }
}

#[test]
#[kernel_test]
fn bounded_buffer() {
    const ITEMS: usize = 12;
    let buffer = Arc::new(Buffer {
        lock: Lock::new("buffer").unwrap(),
        not_full: ConditionVariable::new("not full").unwrap(),
        not_empty: ConditionVariable::new("not empty").unwrap(),
        items: SpinLock::new(VecDeque::new()),
    });
    let output = Arc::new(SpinLock::new(Vec::new()));
    let started = Arc::new(AtomicUsize::new(0));

    let consumers = (0..ITEMS)
        .map(|_| {
            let (buffer, output, started) = (buffer.clone(), output.clone(), started.clone());
            ThreadBuilder::new("consumer").spawn(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let item = buffer.get();
                let mut output = output.lock();
                output.push(item);
                output.unlock();
            })
        })
        .collect::<Vec<_>>();
    wait_until(|| started.load(Ordering::SeqCst) == ITEMS);

    let producers = [0..ITEMS / 2, ITEMS / 2..ITEMS].map(|range| {
        let buffer = buffer.clone();
        ThreadBuilder::new("producer").spawn(move || {
            for i in range {
                buffer.put(i);
            }
        })
    });

    for consumer in consumers {
        assert_eq!(consumer.join(), 0);
    }
    for producer in producers {
        assert_eq!(producer.join(), 0);
    }

    let mut output = output.lock();
    output.sort();
    assert_eq!(&*output, &(0..ITEMS).collect::<Vec<_>>());
    output.unlock();
    assert_eq!(buffer.len(), 0);
}
