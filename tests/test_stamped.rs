// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// StampedRwLock primitive and the StampedUpgradeLock backend built on it.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use readmostly::{
    IllegalState, LockBackend, LockError, StampToken, StampedRwLock, StampedUpgradeLock,
};

// ---------------------------------------------------------------------------
// StampedRwLock
// ---------------------------------------------------------------------------

#[test]
fn write_lock_protection() {
    let lock = Arc::new(StampedRwLock::new());
    let data = Arc::new(AtomicI32::new(0));
    let iterations = 500;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let data = Arc::clone(&data);
            thread::spawn(move || {
                for _ in 0..iterations {
                    let s = lock.write();
                    data.fetch_add(1, Ordering::Relaxed);
                    assert!(lock.unlock_write(s));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(data.load(Ordering::Relaxed), iterations * 2);
}

#[test]
fn concurrent_readers() {
    let lock = Arc::new(StampedRwLock::new());
    let concurrent = Arc::new(AtomicI32::new(0));
    let max_concurrent = Arc::new(AtomicI32::new(0));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let cr = Arc::clone(&concurrent);
            let mc = Arc::clone(&max_concurrent);
            thread::spawn(move || {
                for _ in 0..20 {
                    let s = lock.read();
                    let current = cr.fetch_add(1, Ordering::SeqCst) + 1;
                    mc.fetch_max(current, Ordering::Relaxed);
                    thread::sleep(Duration::from_micros(100));
                    cr.fetch_sub(1, Ordering::SeqCst);
                    assert!(lock.unlock_read(s));
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(
        max_concurrent.load(Ordering::Relaxed) > 1,
        "should have had multiple concurrent readers"
    );
}

#[test]
fn readers_writers_no_overlap() {
    let lock = Arc::new(StampedRwLock::new());
    let readers = Arc::new(AtomicI32::new(0));
    let writer_active = Arc::new(AtomicBool::new(false));
    let violation = Arc::new(AtomicBool::new(false));

    let mut handles: Vec<_> = (0..2)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let readers = Arc::clone(&readers);
            let wa = Arc::clone(&writer_active);
            let viol = Arc::clone(&violation);
            thread::spawn(move || {
                for _ in 0..30 {
                    let s = lock.read();
                    readers.fetch_add(1, Ordering::SeqCst);
                    if wa.load(Ordering::SeqCst) {
                        viol.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(50));
                    readers.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock_read(s);
                    thread::yield_now();
                }
            })
        })
        .collect();

    let lock_w = Arc::clone(&lock);
    let readers_w = Arc::clone(&readers);
    let wa_w = Arc::clone(&writer_active);
    let viol_w = Arc::clone(&violation);
    handles.push(thread::spawn(move || {
        for _ in 0..15 {
            let s = lock_w.write();
            wa_w.store(true, Ordering::SeqCst);
            if readers_w.load(Ordering::SeqCst) > 0 {
                viol_w.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(50));
            wa_w.store(false, Ordering::SeqCst);
            lock_w.unlock_write(s);
            thread::yield_now();
        }
    }));

    for h in handles {
        h.join().unwrap();
    }

    assert!(!violation.load(Ordering::SeqCst));
}

#[test]
fn optimistic_read_detects_concurrent_write() {
    let lock = Arc::new(StampedRwLock::new());
    let stamp = lock.try_optimistic_read();
    assert!(lock.validate(stamp));

    let l2 = Arc::clone(&lock);
    thread::spawn(move || {
        let w = l2.write();
        l2.unlock_write(w);
    })
    .join()
    .unwrap();

    assert!(!lock.validate(stamp));
    assert!(lock.validate(lock.try_optimistic_read()));
}

#[test]
fn pending_writer_blocks_new_readers() {
    let lock = Arc::new(StampedRwLock::new());
    let r = lock.read();

    let l2 = Arc::clone(&lock);
    let writer = thread::spawn(move || {
        let w = l2.write();
        thread::sleep(Duration::from_millis(2));
        l2.unlock_write(w);
    });

    while !lock.is_write_locked() {
        thread::yield_now();
    }
    assert!(lock.try_read().is_none());
    assert!(lock.unlock_read(r));
    writer.join().unwrap();
    assert!(lock.try_read().is_some());
}

// ---------------------------------------------------------------------------
// StampedUpgradeLock
// ---------------------------------------------------------------------------

#[test]
fn reentrant_read_is_sentinel() {
    let lock = StampedUpgradeLock::new();
    let outer = lock.start_read();
    assert!(!outer.is_sentinel());
    let inner = lock.start_read();
    assert_eq!(inner, StampToken::Reentrant);

    lock.end_read(inner).unwrap();
    assert!(lock.is_read_locked_by_this_thread());
    lock.end_read(outer).unwrap();
    assert!(!lock.is_read_locked_by_this_thread());
    assert_eq!(lock.reader_count(), 0);
}

#[test]
fn try_read_fails_while_write_held() {
    let lock = Arc::new(StampedUpgradeLock::new());
    lock.write_lock().unwrap();
    assert!(lock.is_write_thread());

    let l2 = Arc::clone(&lock);
    assert!(thread::spawn(move || l2.start_try_read().is_none()).join().unwrap());

    lock.write_unlock().unwrap();
    let l3 = Arc::clone(&lock);
    thread::spawn(move || {
        let t = l3.start_try_read().unwrap();
        assert!(!t.is_sentinel());
        l3.end_read(t).unwrap();
    })
    .join()
    .unwrap();
}

#[test]
fn write_holder_reads_implicitly() {
    let lock = StampedUpgradeLock::new();
    lock.write_lock().unwrap();
    assert_eq!(lock.start_read(), StampToken::Reentrant);
    assert_eq!(lock.start_try_read(), Some(StampToken::Reentrant));
    lock.end_read(StampToken::Reentrant).unwrap();
    lock.write_unlock().unwrap();
}

#[test]
fn upgrade_from_read_is_rejected() {
    let lock = StampedUpgradeLock::new();
    let t = lock.start_read();
    assert_eq!(
        lock.write_lock(),
        Err(LockError::IllegalState(IllegalState::ReadHeldOnWrite))
    );
    lock.end_read(t).unwrap();
    lock.write_lock().unwrap();
    assert_eq!(
        lock.write_lock(),
        Err(LockError::IllegalState(IllegalState::WriteAlreadyRequested))
    );
    lock.write_unlock().unwrap();
    assert_eq!(
        lock.write_unlock(),
        Err(LockError::IllegalState(IllegalState::WriteNotHeld))
    );
}

#[test]
fn foreign_thread_cannot_release() {
    let lock = Arc::new(StampedUpgradeLock::new());
    let t = lock.start_read();
    lock.write_lock().unwrap_err();

    let l2 = Arc::clone(&lock);
    let (unlock, release) = thread::spawn(move || (l2.write_unlock(), l2.end_read(t)))
        .join()
        .unwrap();
    assert_eq!(unlock, Err(LockError::IllegalState(IllegalState::WriteNotHeld)));
    assert_eq!(
        release,
        Err(LockError::IllegalState(IllegalState::ForeignReadToken))
    );
    assert!(lock.is_read_locked_by_this_thread());
    lock.end_read(t).unwrap();
}

#[test]
fn intent_is_an_alias_for_write() {
    let lock = Arc::new(StampedUpgradeLock::new());
    assert!(!lock.has_distinct_intent());
    lock.acquire_write_intent().unwrap();
    assert!(LockBackend::is_write_locked(&*lock));

    let (tx, rx) = mpsc::channel();
    let l2 = Arc::clone(&lock);
    let reader = thread::spawn(move || {
        let t = l2.start_read();
        tx.send(()).unwrap();
        l2.end_read(t).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());

    lock.release_write_intent().unwrap();
    rx.recv().unwrap();
    reader.join().unwrap();
}

#[test]
fn suspension_fires_hooks_and_reacquires() {
    let lock = Arc::new(StampedUpgradeLock::new());
    lock.write_lock().unwrap();
    let fired = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&fired);
    lock.write_boundary_hooks().register("flush", move || {
        f.store(true, Ordering::SeqCst);
    });

    let suspension = lock.suspend_write().unwrap();
    assert!(lock.is_write_suspended());
    let l2 = Arc::clone(&lock);
    thread::spawn(move || {
        let t = l2.start_try_read().unwrap();
        l2.end_read(t).unwrap();
    })
    .join()
    .unwrap();

    drop(suspension);
    assert!(fired.load(Ordering::SeqCst));
    assert!(lock.is_write_thread());
    assert!(!lock.is_write_suspended());
    lock.write_unlock().unwrap();
}

#[test]
fn mixed_readers_and_writer_stay_exclusive() {
    let lock = Arc::new(StampedUpgradeLock::new());
    let writing = Arc::new(AtomicBool::new(false));
    let violation = Arc::new(AtomicBool::new(false));

    let mut handles: Vec<_> = (0..3)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let writing = Arc::clone(&writing);
            let viol = Arc::clone(&violation);
            thread::spawn(move || {
                for _ in 0..500 {
                    let t = lock.start_read();
                    if writing.load(Ordering::SeqCst) {
                        viol.store(true, Ordering::SeqCst);
                    }
                    lock.end_read(t).unwrap();
                }
            })
        })
        .collect();

    let lock_w = Arc::clone(&lock);
    let writing_w = Arc::clone(&writing);
    handles.push(thread::spawn(move || {
        for _ in 0..100 {
            lock_w.write_lock().unwrap();
            writing_w.store(true, Ordering::SeqCst);
            thread::yield_now();
            writing_w.store(false, Ordering::SeqCst);
            lock_w.write_unlock().unwrap();
        }
    }));

    for h in handles {
        h.join().unwrap();
    }
    assert!(!violation.load(Ordering::SeqCst));
    assert_eq!(lock.reader_count(), 0);
}
