use grading::{kernel_test, wait_until};
use keos::thread::{Current, ThreadBuilder, ThreadState, get_state_by_tid};
use keos_synch::sync::Lock;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

#[test]
#[kernel_test]
fn new_lock_is_free() {
    let lock = Lock::new("fresh").unwrap();
    assert_eq!(lock.name(), "fresh");
    assert_eq!(lock.holder(), None);
    assert!(!lock.do_i_hold());
}

#[test]
#[kernel_test]
fn reentrant_holds_must_all_be_released() {
    let lock = Arc::new(Lock::new("reentrant").unwrap());
    let me = Current::get_tid();

    lock.acquire();
    lock.acquire();
    assert_eq!(lock.holder(), Some(me));

    let acquired = Arc::new(AtomicBool::new(false));
    let b = {
        let (lock, acquired) = (lock.clone(), acquired.clone());
        ThreadBuilder::new("b").spawn(move || {
            lock.acquire();
            acquired.store(true, Ordering::SeqCst);
            assert!(lock.do_i_hold());
            lock.release();
        })
    };
    wait_until(|| b.state() == ThreadState::Parked);

    lock.release();
    assert!(lock.do_i_hold());
    grading::yield_times(3);
    assert!(!acquired.load(Ordering::SeqCst));
    assert_eq!(get_state_by_tid(b.tid), Ok(ThreadState::Parked));

    lock.release();
    assert!(!lock.do_i_hold());
    assert_eq!(b.join(), 0);
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(lock.holder(), None);
}

#[test]
#[kernel_test]
fn do_i_hold_only_for_owner() {
    let lock = Arc::new(Lock::new("owned").unwrap());
    lock.acquire();
    let other = {
        let lock = lock.clone();
        ThreadBuilder::new("other").spawn(move || {
            assert!(!lock.do_i_hold());
        })
    };
    assert_eq!(other.join(), 0);
    assert!(lock.do_i_hold());
    lock.release();
    assert!(!lock.do_i_hold());
}

#[test]
#[kernel_test]
fn mutual_exclusion_across_yields() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 4;
    let lock = Arc::new(Lock::new("counter").unwrap());
    let counter = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));

    let workers = (0..THREADS)
        .map(|_| {
            let (lock, counter, inside) = (lock.clone(), counter.clone(), inside.clone());
            ThreadBuilder::new("worker").spawn(move || {
                for _ in 0..ROUNDS {
                    let _held = lock.hold();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    // A non-atomic increment, split by a yield.
                    let value = counter.load(Ordering::SeqCst);
                    Current::yield_now();
                    counter.store(value + 1, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        assert_eq!(worker.join(), 0);
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
    assert_eq!(lock.holder(), None);
}

#[test]
#[kernel_test]
fn waiter_parks_instead_of_spinning() {
    let lock = Arc::new(Lock::new("parking").unwrap());
    let held = lock.hold();
    let spawned = Arc::new(AtomicBool::new(false));

    let be_parked = {
        let (spawned, lock) = (spawned.clone(), lock.clone());
        ThreadBuilder::new("blockee").spawn(move || {
            spawned.store(true, Ordering::SeqCst);
            lock.acquire();
            lock.release();
        })
    };

    wait_until(|| spawned.load(Ordering::SeqCst));
    assert_eq!(
        get_state_by_tid(be_parked.tid),
        Ok(ThreadState::Parked),
        "Blocked thread by Lock should be in Parked state"
    );

    drop(held);
    assert_eq!(be_parked.join(), 0);
}

#[test]
#[kernel_test]
fn guard_releases_one_hold() {
    let lock = Lock::new("scoped").unwrap();
    lock.acquire();
    {
        let guard = lock.hold();
        assert_eq!(guard.lock().name(), "scoped");
    }
    assert!(lock.do_i_hold());
    lock.release();
    assert_eq!(lock.holder(), None);
}

#[test]
#[kernel_test]
fn panicking_holder_releases_guard() {
    let lock = Arc::new(Lock::new("crash").unwrap());
    let crasher = {
        let lock = lock.clone();
        ThreadBuilder::new("crasher").spawn(move || {
            let _held = lock.hold();
            panic!("crash while holding");
        })
    };
    assert_eq!(crasher.join(), -1);
    assert_eq!(lock.holder(), None);
}

#[cfg(not(feature = "strict_release"))]
#[test]
#[kernel_test]
fn release_by_stranger_is_ignored() {
    let lock = Arc::new(Lock::new("mine").unwrap());
    lock.acquire();
    let stranger = {
        let lock = lock.clone();
        ThreadBuilder::new("stranger").spawn(move || lock.release())
    };
    assert_eq!(stranger.join(), 0);
    assert!(lock.do_i_hold());
    lock.release();

    lock.release();
    assert_eq!(lock.holder(), None);
}

#[cfg(feature = "strict_release")]
#[test]
#[should_panic(expected = "which does not hold it")]
#[kernel_test]
fn release_by_stranger_is_fatal() {
    let lock = Lock::new("mine").unwrap();
    lock.release();
}
