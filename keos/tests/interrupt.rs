use grading::{kernel_test, wait_until};
use keos::{
    interrupt::{self, InterruptGuard, InterruptState, Ipl, in_interrupt, splhigh, splx},
    thread::{Current, ThreadBuilder, ThreadState, WaitChannel, wakeup},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

fn counting_handler(vector: usize) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = hits.clone();
        interrupt::register(vector, move |delivered| {
            assert_eq!(delivered, vector);
            assert!(in_interrupt());
            assert_eq!(InterruptState::current(), InterruptState::Off);
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    hits
}

#[test]
#[kernel_test]
fn unmasked_interrupt_is_delivered_immediately() {
    let hits = counting_handler(3);
    interrupt::raise(3);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!in_interrupt());
}

#[test]
#[kernel_test]
fn masked_interrupt_waits_for_the_outermost_guard() {
    let hits = counting_handler(4);
    let outer = InterruptGuard::new();
    {
        let _inner = InterruptGuard::new();
        interrupt::raise(4);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    drop(outer);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
#[kernel_test]
fn spl_pairs_nest() {
    let hits = counting_handler(9);
    let first = splhigh();
    let second = splhigh();
    assert_eq!((first, second), (Ipl::Low, Ipl::High));
    interrupt::raise(9);
    splx(second);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    splx(first);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
#[kernel_test]
fn interrupt_raised_in_handler_runs_after_it() {
    let order = Arc::new(AtomicUsize::new(0));
    let nested_seen_first = Arc::new(AtomicBool::new(false));
    {
        let order = order.clone();
        interrupt::register(1, move |_| {
            interrupt::raise(2);
            order.store(1, Ordering::SeqCst);
        });
    }
    {
        let (order, nested_seen_first) = (order.clone(), nested_seen_first.clone());
        interrupt::register(2, move |_| {
            nested_seen_first.store(order.load(Ordering::SeqCst) == 0, Ordering::SeqCst);
            order.store(2, Ordering::SeqCst);
        });
    }
    interrupt::raise(1);
    assert_eq!(order.load(Ordering::SeqCst), 2);
    assert!(!nested_seen_first.load(Ordering::SeqCst));
}

#[test]
#[kernel_test]
fn pending_interrupt_is_taken_by_next_unmasked_thread() {
    let hits = counting_handler(6);
    let chan = WaitChannel::new();
    let masked = ThreadBuilder::new("masked").spawn(move || {
        let _guard = InterruptGuard::new();
        interrupt::raise(6);
        Current::sleep_on(chan);
    });
    wait_until(|| masked.state() == ThreadState::Parked);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    wakeup(chan);
    assert_eq!(masked.join(), 0);
}

#[test]
#[kernel_test]
fn handler_may_wake_a_sleeper() {
    let chan = WaitChannel::new();
    interrupt::register(12, move |_| wakeup(chan));
    let sleeper = ThreadBuilder::new("sleeper").spawn(move || {
        let _guard = InterruptGuard::new();
        Current::sleep_on(chan);
    });
    wait_until(|| sleeper.state() == ThreadState::Parked);
    interrupt::raise(12);
    assert_eq!(sleeper.state(), ThreadState::Runnable);
    assert_eq!(sleeper.join(), 0);
}

#[test]
#[should_panic(expected = "Unknown interrupt #33")]
#[kernel_test]
fn unregistered_vector_is_fatal() {
    interrupt::raise(33);
}

#[test]
#[should_panic(expected = "May not sleep in an interrupt handler")]
#[kernel_test]
fn sleeping_in_handler_is_fatal() {
    interrupt::register(8, |_| Current::sleep_on(WaitChannel::new()));
    interrupt::raise(8);
}
