// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cooperative cancellation seen by the lock.
//
// The lock never owns cancellation policy: it asks an injected `CancelCheck`
// at safe points of a blocking wait (the top of a park iteration, never inside
// the yield phase). A thread inside `non_cancelable` ignores both the check and
// the impatient-reader fail-fast.
//
// `WriteBoundaryHooks` holds one-shot callbacks for work that must not survive
// across a write boundary; they fire when a suspended write resumes.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{LockError, LockResult};

/// Source of an external cancellation signal.
pub trait CancelCheck: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A `CancelCheck` that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancelled;

impl CancelCheck for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A settable cancellation flag.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
}

impl CancelFlag {
    pub const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

impl CancelCheck for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

thread_local! {
    static NON_CANCELABLE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct NonCancelableScope;

impl NonCancelableScope {
    fn enter() -> Self {
        NON_CANCELABLE_DEPTH.with(|d| d.set(d.get() + 1));
        NonCancelableScope
    }
}

impl Drop for NonCancelableScope {
    fn drop(&mut self) {
        NON_CANCELABLE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Run `f` with cancellation and impatient fail-fast suppressed on this thread.
pub fn non_cancelable<R>(f: impl FnOnce() -> R) -> R {
    let _scope = NonCancelableScope::enter();
    f()
}

/// Whether the calling thread is inside [`non_cancelable`].
pub fn is_in_non_cancelable_section() -> bool {
    NON_CANCELABLE_DEPTH.with(|d| d.get() > 0)
}

/// Safe-point check used by blocking waits.
pub(crate) fn check_cancelled(check: &dyn CancelCheck) -> LockResult<()> {
    if check.is_cancelled() && !is_in_non_cancelable_section() {
        tracing::trace!("lock wait cancelled");
        return Err(LockError::OperationCancelled);
    }
    Ok(())
}

type BoundaryHook = Box<dyn FnOnce() + Send + 'static>;

/// Named one-shot callbacks run before a suspended write is re-acquired.
#[derive(Default)]
pub struct WriteBoundaryHooks {
    hooks: Mutex<Vec<(String, BoundaryHook)>>,
}

impl WriteBoundaryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. A hook with the same name is replaced in place.
    pub fn register<F>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let hook: BoundaryHook = Box::new(hook);
        let mut hooks = self.hooks.lock();
        if let Some(pos) = hooks.iter().position(|(n, _)| *n == name) {
            hooks[pos] = (name, hook);
        } else {
            hooks.push((name, hook));
        }
    }

    /// Remove a pending hook. Returns `true` if one was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut hooks = self.hooks.lock();
        match hooks.iter().position(|(n, _)| n == name) {
            Some(pos) => {
                hooks.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Run and clear every pending hook, in registration order.
    pub fn fire(&self) {
        // Hooks run unlocked so they may register follow-ups.
        let hooks = std::mem::take(&mut *self.hooks.lock());
        if !hooks.is_empty() {
            tracing::debug!(count = hooks.len(), "firing write-boundary hooks");
        }
        for (_, hook) in hooks {
            hook();
        }
    }
}

impl std::fmt::Debug for WriteBoundaryHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.lock();
        f.debug_list().entries(hooks.iter().map(|(n, _)| n)).finish()
    }
}
