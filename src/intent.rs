// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-owner write-intent flag.
// An exchange-to-true flag with spin-then-park waiting. Parked waiters queue
// their thread handle; release hands off by unparking exactly one of them.
// Waiters also re-test on every park timeout, so a lost wake-up only costs
// latency.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

use parking_lot::Mutex;

use crate::backoff::Backoff;
use crate::cancel::{self, CancelCheck};
use crate::{LockConfig, LockResult};

/// A flag exactly one thread may hold at a time.
#[derive(Debug, Default)]
pub struct IntentFlag {
    held: AtomicBool,
    waiters: Mutex<VecDeque<Thread>>,
}

impl IntentFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag if it is free.
    pub fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Take the flag, waiting as long as needed.
    ///
    /// While parked, `cancel` is consulted on every iteration; a cancelled
    /// wait leaves the flag untouched.
    pub fn lock(&self, config: &LockConfig, cancel: &dyn CancelCheck) -> LockResult<()> {
        let mut backoff = Backoff::new(config);
        let me = thread::current();
        let result = loop {
            if self.try_lock() {
                break Ok(());
            }
            if backoff.will_park() {
                if let Err(e) = cancel::check_cancelled(cancel) {
                    break Err(e);
                }
                self.enqueue(&me);
            }
            backoff.snooze();
        };
        self.dequeue(&me);
        result
    }

    /// Release the flag and wake one waiter.
    pub fn unlock(&self) {
        self.held.store(false, Ordering::SeqCst);
        let next = self.waiters.lock().pop_front();
        if let Some(next) = next {
            tracing::trace!(thread = ?next.id(), "handing write intent to next waiter");
            next.unpark();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Number of parked waiters.
    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }

    fn enqueue(&self, me: &Thread) {
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|t| t.id() == me.id()) {
            waiters.push_back(me.clone());
        }
    }

    fn dequeue(&self, me: &Thread) {
        self.waiters.lock().retain(|t| t.id() != me.id());
    }
}
