// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Reader/writer stress run against either backend.
//
// Usage:
//   lock_stress <readers> <millis> [stamped]
//
// Spawns <readers> reader threads and one writer thread. The writer runs
// write actions (taking write intent on the way) for <millis> milliseconds
// while the readers run read actions. Both sides cross-check shared counters
// inside their critical sections; any overlap is reported and the process
// exits with status 2.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use readmostly::{ActionRunner, LockBackend, LockConfig, ReaderSetLock, StampedUpgradeLock};

#[derive(Default)]
struct Shared {
    readers_in: AtomicI64,
    writing: AtomicBool,
    violations: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    stop: AtomicBool,
}

fn run<L: LockBackend + 'static>(lock: L, readers: usize, millis: u64) -> Arc<Shared> {
    let runner = Arc::new(ActionRunner::for_lock(Arc::new(lock)));
    let shared = Arc::new(Shared::default());

    let mut handles: Vec<_> = (0..readers)
        .map(|i| {
            let runner = Arc::clone(&runner);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("reader-{i}"))
                .spawn(move || {
                    while !shared.stop.load(Ordering::Acquire) {
                        let result = runner.run_read_action(|| {
                            shared.readers_in.fetch_add(1, Ordering::SeqCst);
                            if shared.writing.load(Ordering::SeqCst) {
                                shared.violations.fetch_add(1, Ordering::Relaxed);
                            }
                            shared.readers_in.fetch_sub(1, Ordering::SeqCst);
                        });
                        match result {
                            Ok(()) => {
                                shared.reads.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => eprintln!("read failed: {e}"),
                        }
                    }
                })
                .expect("spawn reader")
        })
        .collect();

    {
        let runner = Arc::clone(&runner);
        let shared = Arc::clone(&shared);
        handles.push(
            thread::Builder::new()
                .name("writer".into())
                .spawn(move || {
                    let deadline = Instant::now() + Duration::from_millis(millis);
                    while Instant::now() < deadline {
                        let result = runner.run_write_action("stress", || {
                            shared.writing.store(true, Ordering::SeqCst);
                            if shared.readers_in.load(Ordering::SeqCst) != 0 {
                                shared.violations.fetch_add(1, Ordering::Relaxed);
                            }
                            thread::yield_now();
                            shared.writing.store(false, Ordering::SeqCst);
                        });
                        match result {
                            Ok(()) => {
                                shared.writes.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => eprintln!("write failed: {e}"),
                        }
                    }
                    shared.stop.store(true, Ordering::Release);
                })
                .expect("spawn writer"),
        );
    }

    for h in handles {
        h.join().expect("stress thread panicked");
    }
    shared
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: lock_stress <readers> <millis> [stamped]");
        std::process::exit(1);
    }
    let readers: usize = args[1].parse().expect("readers");
    let millis: u64 = args[2].parse().expect("millis");

    let (backend, shared) = match args.get(3).map(String::as_str) {
        None => ("reader_set", run(ReaderSetLock::new(LockConfig::default()), readers, millis)),
        Some("stamped") => ("stamped", run(StampedUpgradeLock::new(), readers, millis)),
        Some(other) => {
            eprintln!("unknown backend: {other}");
            std::process::exit(1);
        }
    };

    let violations = shared.violations.load(Ordering::Relaxed);
    println!(
        "{backend}: {} reads, {} writes in {millis} ms with {readers} readers",
        shared.reads.load(Ordering::Relaxed),
        shared.writes.load(Ordering::Relaxed),
    );
    if violations > 0 {
        eprintln!("{violations} mutual exclusion violations");
        std::process::exit(2);
    }
}
