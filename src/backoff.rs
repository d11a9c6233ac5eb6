// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Waiting policies.
//
// `Backoff` is the spin-then-park policy shared by readers, the writer and
// intent waiters: cooperative yields for `spin_limit` iterations, then timed
// parks. Every park is bounded so a waiter re-tests its condition (and any
// cancellation) at least once per `park_timeout` even if nobody unparks it.
//
// `adaptive_yield` is the pause -> yield -> sleep ladder used by the stamped
// primitive, which has no per-thread records to unpark.

use std::thread;
use std::time::Duration;

use crate::LockConfig;

/// Adaptive backoff for spin-only waiters.
///
/// - k < 4:  busy spin (do nothing)
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        thread::yield_now();
    } else {
        thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// Spin-then-park retry state for one acquisition attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    iteration: u32,
    spin_limit: u32,
    park_timeout: Duration,
}

impl Backoff {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            iteration: 0,
            spin_limit: config.spin_limit,
            park_timeout: config.park_timeout(),
        }
    }

    /// Number of completed wait steps.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Whether the next step parks instead of yielding.
    pub fn will_park(&self) -> bool {
        self.iteration > self.spin_limit
    }

    /// Perform one wait step.
    pub fn snooze(&mut self) {
        if self.will_park() {
            thread::park_timeout(self.park_timeout);
        } else {
            thread::yield_now();
        }
        self.iteration = self.iteration.saturating_add(1);
    }
}
