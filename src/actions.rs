// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Read/write "actions": closures run under the lock, with the acquisition and
// release tied to the closure's scope.
//
// Write actions nest. The first one on the write thread takes the write and
// the one that took it gives it back; inner actions only push their name on
// the action stack. Inside `execute_suspending_write_action` the write is
// released, so a write action started there acquires and releases on its own.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::LockBackend;
use crate::coordinator::{IntentState, WriteIntentCoordinator};
use crate::LockResult;

/// Observer of write actions. Every method defaults to a no-op.
pub trait WriteActionListener: Send + Sync {
    /// Called before the write lock is requested.
    fn before_write_action_start(&self, _action: &str) {}

    /// Called once the write lock is held, before the action body runs.
    fn write_action_started(&self, _action: &str) {}

    /// Called after the action body, while the write lock is still held.
    fn write_action_finished(&self, _action: &str) {}

    /// Called when the outermost write action has finished and the write
    /// lock has been released.
    fn after_write_action_finished(&self, _action: &str) {}
}

/// Runs read and write actions against a lock through its coordinator.
pub struct ActionRunner<L: LockBackend> {
    coordinator: Arc<WriteIntentCoordinator<L>>,
    listeners: Mutex<Vec<Arc<dyn WriteActionListener>>>,
    write_stack: Mutex<Vec<String>>,
    // Stack depth below which write actions belong to a suspended write.
    stack_base: AtomicUsize,
    write_action_pending: AtomicBool,
}

impl<L: LockBackend> ActionRunner<L> {
    pub fn new(coordinator: Arc<WriteIntentCoordinator<L>>) -> Self {
        Self {
            coordinator,
            listeners: Mutex::new(Vec::new()),
            write_stack: Mutex::new(Vec::new()),
            stack_base: AtomicUsize::new(0),
            write_action_pending: AtomicBool::new(false),
        }
    }

    /// Shortcut for a runner over a fresh coordinator of `lock`.
    pub fn for_lock(lock: Arc<L>) -> Self {
        Self::new(Arc::new(WriteIntentCoordinator::new(lock)))
    }

    pub fn coordinator(&self) -> &Arc<WriteIntentCoordinator<L>> {
        &self.coordinator
    }

    pub fn lock(&self) -> &L {
        self.coordinator.lock()
    }

    pub fn add_write_action_listener(&self, listener: Arc<dyn WriteActionListener>) {
        self.listeners.lock().push(listener);
    }

    /// Returns `false` if `listener` was not registered.
    pub fn remove_write_action_listener(&self, listener: &Arc<dyn WriteActionListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn fire(&self, event: impl Fn(&dyn WriteActionListener)) {
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }

    // -----------------------------------------------------------------------
    // Read actions
    // -----------------------------------------------------------------------

    /// Run `f` under the read lock. The lock is released on every exit path.
    ///
    /// # Errors
    /// `CannotAcquireReadLock` inside an impatient section while a write is
    /// pending; `OperationCancelled` if the wait is cancelled.
    pub fn run_read_action<R>(&self, f: impl FnOnce() -> R) -> LockResult<R> {
        let token = self.lock().acquire_read()?;
        let _release = ReleaseRead {
            lock: self.lock(),
            token: Some(token),
        };
        Ok(f())
    }

    /// Run `f` if the read lock can be taken without waiting.
    pub fn try_run_read_action<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let token = self.lock().try_acquire_read()?;
        let _release = ReleaseRead {
            lock: self.lock(),
            token: Some(token),
        };
        Some(f())
    }

    /// Run `f` with fail-fast read semantics on this thread.
    pub fn execute_by_impatient_reader<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock().run_impatient(f)
    }

    // -----------------------------------------------------------------------
    // Write actions
    // -----------------------------------------------------------------------

    /// Run `f` under write intent.
    pub fn run_intended_write_action<R>(&self, f: impl FnOnce() -> R) -> LockResult<R> {
        self.coordinator.run_intended_write(f)
    }

    /// Run `f` as the write action `name`. Takes write intent for the call
    /// if this thread does not hold it yet.
    pub fn run_write_action<R>(&self, name: &str, f: impl FnOnce() -> R) -> LockResult<R> {
        if !self.coordinator.holds_intent() {
            return self
                .coordinator
                .run_intended_write(|| self.run_write_action(name, f))?;
        }
        let acquired = self.start_write(name)?;
        let _end = EndWrite {
            runner: self,
            name,
            acquired,
        };
        Ok(f())
    }

    fn start_write(&self, name: &str) -> LockResult<bool> {
        let was_pending = self.write_action_pending.swap(true, Ordering::SeqCst);
        self.fire(|l| l.before_write_action_start(name));
        let acquired = if self.coordinator.state() == IntentState::WriteHeld {
            Ok(false)
        } else {
            self.coordinator.acquire_write().map(|()| true)
        };
        self.write_action_pending.store(was_pending, Ordering::SeqCst);
        let acquired = acquired?;

        self.write_stack.lock().push(name.to_owned());
        tracing::trace!(action = name, "write action started");
        self.fire(|l| l.write_action_started(name));
        Ok(acquired)
    }

    /// Run `f` with the current write (if any) suspended, then take it back.
    /// Write actions started inside `f` acquire the write themselves.
    pub fn execute_suspending_write_action<R>(&self, f: impl FnOnce() -> R) -> LockResult<R> {
        if !self.coordinator.holds_write() {
            return Ok(f());
        }
        let depth = self.write_stack.lock().len();
        let _base = RestoreBase {
            slot: &self.stack_base,
            previous: self.stack_base.swap(depth, Ordering::SeqCst),
        };
        let suspension = self.coordinator.suspend_write()?;
        let result = f();
        suspension.resume()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether a write action is waiting for the write lock.
    pub fn is_write_action_pending(&self) -> bool {
        self.write_action_pending.load(Ordering::SeqCst)
    }

    /// Whether a write action is running outside any suspension.
    pub fn is_write_action_in_progress(&self) -> bool {
        self.write_stack.lock().len() > self.stack_base.load(Ordering::SeqCst)
    }

    pub fn has_write_action(&self, name: &str) -> bool {
        self.write_stack.lock().iter().any(|a| a == name)
    }

    pub fn is_write_access_allowed(&self) -> bool {
        let lock = self.lock();
        lock.is_write_thread() && lock.is_write_locked()
    }

    pub fn is_read_access_allowed(&self) -> bool {
        let lock = self.lock();
        lock.is_write_thread() || lock.is_read_locked_by_current_thread()
    }

    pub fn holds_read_lock(&self) -> bool {
        self.lock().is_read_locked_by_current_thread()
    }

    pub fn is_write_thread(&self) -> bool {
        self.lock().is_write_thread()
    }

    pub fn is_in_impatient_reader(&self) -> bool {
        self.lock().is_in_impatient_reader()
    }
}

impl<L: LockBackend> std::fmt::Debug for ActionRunner<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRunner")
            .field("coordinator", &self.coordinator)
            .field("write_stack", &*self.write_stack.lock())
            .finish_non_exhaustive()
    }
}

struct ReleaseRead<'a, L: LockBackend> {
    lock: &'a L,
    token: Option<L::ReadToken>,
}

impl<L: LockBackend> Drop for ReleaseRead<'_, L> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.lock.release_read(token) {
                tracing::error!(error = %e, "failed to release read lock");
            }
        }
    }
}

struct EndWrite<'a, L: LockBackend> {
    runner: &'a ActionRunner<L>,
    name: &'a str,
    acquired: bool,
}

impl<L: LockBackend> Drop for EndWrite<'_, L> {
    fn drop(&mut self) {
        let runner = self.runner;
        runner.fire(|l| l.write_action_finished(self.name));
        let outermost = {
            let mut stack = runner.write_stack.lock();
            stack.pop();
            stack.is_empty()
        };
        if self.acquired {
            if let Err(e) = runner.coordinator.release_write() {
                tracing::error!(action = self.name, error = %e, "failed to release write lock");
            }
        }
        if outermost {
            runner.fire(|l| l.after_write_action_finished(self.name));
        }
    }
}

struct RestoreBase<'a> {
    slot: &'a AtomicUsize,
    previous: usize,
}

impl Drop for RestoreBase<'_> {
    fn drop(&mut self) {
        self.slot.store(self.previous, Ordering::SeqCst);
    }
}
