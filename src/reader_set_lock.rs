// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Read-mostly, writer-preferring reader/writer lock for a single write thread.
//
// Readers never touch shared counters. Each reader raises the flag in its own
// record and then re-checks `write_requested`; the writer raises
// `write_requested` and then scans every record. Both sides use SeqCst, so at
// least one of them observes the other: either the reader backs off, or the
// writer sees the reader's flag and waits. That set-then-recheck on the reader
// side is what gives writers preference without a shared lock on the read
// fast path.
//
// The write thread is whichever thread holds write intent (or was bound with
// `bind_write_thread`). It reads for free: its read entry points return the
// sentinel token without touching any record.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::LockBackend;
use crate::backoff::Backoff;
use crate::cancel::{self, CancelCheck, NeverCancelled, WriteBoundaryHooks};
use crate::intent::IntentFlag;
use crate::reader::{ReaderRecord, ReaderRegistry};
use crate::thread_key::AtomicThreadKey;
use crate::{IllegalState, LockConfig, LockError, LockResult, ThreadKey};

/// Returned by a read acquisition; pass it back to [`ReaderSetLock::end_read`].
///
/// The sentinel form means nothing was acquired (write thread, or a
/// reentrant read on a thread that already holds the lock) and releasing it
/// is a no-op.
#[must_use = "read tokens must be passed back to end_read"]
#[derive(Debug)]
pub struct ReadToken(Option<Arc<ReaderRecord>>);

impl ReadToken {
    fn sentinel() -> Self {
        ReadToken(None)
    }

    pub fn is_sentinel(&self) -> bool {
        self.0.is_none()
    }

    pub fn record(&self) -> Option<&ReaderRecord> {
        self.0.as_deref()
    }
}

/// Point-in-time view of a [`ReaderSetLock`] for logs and thread dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDiagnostics {
    pub registered_readers: usize,
    pub active_readers: usize,
    pub blocked_readers: usize,
    pub dead_readers: usize,
    pub write_requested: bool,
    pub write_acquired: bool,
    pub write_intent_held: bool,
    pub intent_waiters: usize,
    pub write_suspended: bool,
    pub reclaimed_total: u64,
}

impl fmt::Display for LockDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "readers: {} registered, {} active, {} blocked, {} dead ({} reclaimed); \
             write: requested={} acquired={} intent={} ({} waiting) suspended={}",
            self.registered_readers,
            self.active_readers,
            self.blocked_readers,
            self.dead_readers,
            self.reclaimed_total,
            self.write_requested,
            self.write_acquired,
            self.write_intent_held,
            self.intent_waiters,
            self.write_suspended,
        )
    }
}

/// Reader/writer lock keeping per-thread reader state in thread-local records.
pub struct ReaderSetLock {
    config: LockConfig,
    cancel: Arc<dyn CancelCheck>,
    hooks: WriteBoundaryHooks,
    readers: ReaderRegistry,

    write_thread: AtomicThreadKey,
    bound_write_thread: AtomicThreadKey,
    write_intent_thread: AtomicThreadKey,
    // Handle of the thread waiting in `write_lock`, unparked by `end_read`.
    writer: Mutex<Option<Thread>>,

    write_requested: AtomicBool,
    write_acquired: AtomicBool,
    write_suspended: AtomicBool,
    intent: IntentFlag,

    created: Instant,
    last_reclaim_us: AtomicU64,
    reclaimed_total: AtomicU64,
}

impl ReaderSetLock {
    pub fn new(config: LockConfig) -> Self {
        Self::with_cancellation(config, Arc::new(NeverCancelled))
    }

    /// Create a lock whose blocking waits observe `cancel`.
    pub fn with_cancellation(config: LockConfig, cancel: Arc<dyn CancelCheck>) -> Self {
        Self {
            config,
            cancel,
            hooks: WriteBoundaryHooks::new(),
            readers: ReaderRegistry::new(),
            write_thread: AtomicThreadKey::none(),
            bound_write_thread: AtomicThreadKey::none(),
            write_intent_thread: AtomicThreadKey::none(),
            writer: Mutex::new(None),
            write_requested: AtomicBool::new(false),
            write_acquired: AtomicBool::new(false),
            write_suspended: AtomicBool::new(false),
            intent: IntentFlag::new(),
            created: Instant::now(),
            last_reclaim_us: AtomicU64::new(0),
            reclaimed_total: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Hooks fired when a suspended write resumes.
    pub fn write_boundary_hooks(&self) -> &WriteBoundaryHooks {
        &self.hooks
    }

    // -----------------------------------------------------------------------
    // Write-thread designation
    // -----------------------------------------------------------------------

    /// Designate the calling thread as the permanent write thread, for
    /// callers that take bare writes without write intent.
    pub fn bind_write_thread(&self) -> LockResult<()> {
        let me = ThreadKey::current();
        match self.bound_write_thread.claim(me) {
            Ok(()) => {}
            Err(other) if other == me => {}
            Err(_) => return Err(IllegalState::WriteThreadAlreadyBound.into()),
        }
        if self.write_intent_thread.load().is_none() {
            self.write_thread.store(me);
        }
        Ok(())
    }

    /// Undo [`bind_write_thread`](Self::bind_write_thread).
    pub fn unbind_write_thread(&self) -> LockResult<()> {
        if !self.bound_write_thread.is_current() {
            return Err(IllegalState::NotWriteThread.into());
        }
        if self.write_requested.load(Ordering::SeqCst) {
            return Err(IllegalState::WriteAlreadyRequested.into());
        }
        self.bound_write_thread.store(ThreadKey::NONE);
        if self.write_thread.is_current() && self.write_intent_thread.load().is_none() {
            self.write_thread.store(ThreadKey::NONE);
        }
        Ok(())
    }

    fn check_write_thread(&self) -> LockResult<()> {
        if self.write_thread.is_current() {
            Ok(())
        } else {
            Err(IllegalState::NotWriteThread.into())
        }
    }

    // A thread whose own read flag is up would wait on itself forever in
    // `write_lock`, and cannot release the read once it is the write thread.
    fn check_no_read_held(&self) -> LockResult<()> {
        if self.is_read_locked_by_this_thread() {
            Err(IllegalState::ReadHeldOnWrite.into())
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Acquire the read lock.
    ///
    /// # Errors
    /// `CannotAcquireReadLock` when the calling thread is an impatient reader
    /// and a write is pending; `OperationCancelled` when cancellation is
    /// observed while parked. Neither leaves the read lock held.
    pub fn start_read(&self) -> LockResult<ReadToken> {
        if self.is_write_thread() {
            return Ok(ReadToken::sentinel());
        }
        let status = self.readers.current();
        self.throw_if_impatient(&status)?;
        if status.is_read_requested() {
            return Ok(ReadToken::sentinel());
        }

        if !self.try_read_lock(&status)? {
            let mut backoff = Backoff::new(&self.config);
            loop {
                if self.try_read_lock(&status)? {
                    break;
                }
                if backoff.will_park() {
                    cancel::check_cancelled(self.cancel.as_ref())?;
                }
                self.wait_a_bit(&status, &mut backoff)?;
            }
        }
        Ok(ReadToken(Some(status)))
    }

    /// One optimistic read attempt. `None` means not acquired: a write is
    /// pending (for impatient readers too).
    pub fn start_try_read(&self) -> Option<ReadToken> {
        if self.is_write_thread() {
            return Some(ReadToken::sentinel());
        }
        let status = self.readers.current();
        if status.is_read_requested() {
            return Some(ReadToken::sentinel());
        }
        match self.try_read_lock(&status) {
            Ok(true) => Some(ReadToken(Some(status))),
            Ok(false) | Err(_) => None,
        }
    }

    /// Release a read acquisition.
    pub fn end_read(&self, token: ReadToken) -> LockResult<()> {
        let Some(status) = token.0 else {
            return Ok(());
        };
        if self.is_write_thread() {
            return Err(IllegalState::ReadReleasedFromWriteThread.into());
        }
        if status.owner() != ThreadKey::current() || status.registry_id() != self.readers.id() {
            return Err(IllegalState::ForeignReadToken.into());
        }
        status.set_read_requested(false);
        if self.write_requested.load(Ordering::SeqCst) {
            self.wake_writer();
        }
        Ok(())
    }

    /// Run `action` as an impatient reader: read acquisitions inside it fail
    /// with `CannotAcquireReadLock` instead of waiting for a pending write.
    pub fn execute_by_impatient_reader<R>(&self, action: impl FnOnce() -> R) -> R {
        struct Restore {
            status: Arc<ReaderRecord>,
            previous: bool,
        }
        impl Drop for Restore {
            fn drop(&mut self) {
                self.status.replace_impatient(self.previous);
            }
        }

        let status = self.readers.current();
        let previous = status.replace_impatient(true);
        let _restore = Restore { status, previous };
        action()
    }

    fn try_read_lock(&self, status: &ReaderRecord) -> LockResult<bool> {
        self.throw_if_impatient(status)?;
        if !self.write_requested.load(Ordering::SeqCst) {
            status.set_read_requested(true);
            if !self.write_requested.load(Ordering::SeqCst) {
                return Ok(true);
            }
            status.set_read_requested(false);
            // The writer may already be parked on our flag.
            self.wake_writer();
        }
        Ok(false)
    }

    fn wait_a_bit(&self, status: &ReaderRecord, backoff: &mut Backoff) -> LockResult<()> {
        if !backoff.will_park() {
            backoff.snooze();
            return Ok(());
        }
        status.set_blocked(true);
        let result = self.throw_if_impatient(status);
        if result.is_ok() {
            backoff.snooze(); // unparked by write_unlock
        }
        status.set_blocked(false);
        result
    }

    fn throw_if_impatient(&self, status: &ReaderRecord) -> LockResult<()> {
        if status.is_impatient()
            && self.write_requested.load(Ordering::SeqCst)
            && !cancel::is_in_non_cancelable_section()
        {
            tracing::trace!("impatient reader gives up: write pending");
            return Err(LockError::CannotAcquireReadLock);
        }
        Ok(())
    }

    fn wake_writer(&self) {
        if let Some(writer) = self.writer.lock().as_ref() {
            writer.unpark();
        }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Acquire the write lock. Write thread only, not reentrant, and not
    /// while the caller holds a real read.
    ///
    /// Waits until no live reader has its read flag raised. A cancelled wait
    /// withdraws the request before returning `OperationCancelled`.
    pub fn write_lock(&self) -> LockResult<()> {
        self.check_write_thread()?;
        self.check_no_read_held()?;
        if self.write_requested.load(Ordering::SeqCst) || self.write_acquired.load(Ordering::SeqCst) {
            return Err(IllegalState::WriteAlreadyRequested.into());
        }

        *self.writer.lock() = Some(thread::current());
        self.write_requested.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let mut warned = false;
        let mut backoff = Backoff::new(&self.config);
        loop {
            if self.readers.all_idle() {
                self.write_acquired.store(true, Ordering::SeqCst);
                break;
            }
            if backoff.will_park() {
                if let Err(e) = cancel::check_cancelled(self.cancel.as_ref()) {
                    self.withdraw_write_request();
                    return Err(e);
                }
                if !warned {
                    warned = self.warn_if_slow(started.elapsed());
                }
            }
            backoff.snooze();
        }

        let waited = started.elapsed();
        if waited >= Duration::from_millis(1) {
            tracing::debug!(waited_ms = waited.as_millis() as u64, "write lock wait time");
        }
        Ok(())
    }

    /// Release the write lock and wake every parked reader.
    pub fn write_unlock(&self) -> LockResult<()> {
        self.check_write_thread()?;
        if !self.write_acquired.load(Ordering::SeqCst) {
            return Err(IllegalState::WriteNotHeld.into());
        }
        self.write_acquired.store(false, Ordering::SeqCst);
        self.write_requested.store(false, Ordering::SeqCst);
        *self.writer.lock() = None;

        let dead = self.readers.unpark_blocked();
        if dead > 0 && self.reclaim_due() {
            self.reclaim_dead_readers();
        }
        Ok(())
    }

    /// Release the held write immediately and mark the lock suspended.
    /// Returns the previous suspended flag (nested suspension).
    fn write_suspend(&self) -> LockResult<bool> {
        self.check_write_thread()?;
        let previous = self.write_suspended.swap(true, Ordering::SeqCst);
        if let Err(e) = self.write_unlock() {
            self.write_suspended.store(previous, Ordering::SeqCst);
            return Err(e);
        }
        Ok(previous)
    }

    fn write_resume(&self, was_suspended: bool) -> LockResult<()> {
        self.hooks.fire();
        let result = self.write_lock();
        self.write_suspended.store(was_suspended, Ordering::SeqCst);
        result
    }

    fn withdraw_write_request(&self) {
        self.write_requested.store(false, Ordering::SeqCst);
        *self.writer.lock() = None;
        self.readers.unpark_blocked();
    }

    fn warn_if_slow(&self, waited: Duration) -> bool {
        match self.config.slow_write_threshold() {
            Some(threshold) if waited >= threshold => {
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    readers = ?self.readers.active_thread_names(),
                    "write lock still waiting for readers"
                );
                true
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Write intent
    // -----------------------------------------------------------------------

    /// Acquire write intent; the caller becomes the write thread. Fails with
    /// `ReadHeldOnWrite` while the caller holds a real read.
    pub fn write_intent_lock(&self) -> LockResult<()> {
        if self.write_intent_thread.is_current() {
            return Err(IllegalState::IntentStateViolation.into());
        }
        self.check_no_read_held()?;
        self.intent.lock(&self.config, self.cancel.as_ref())?;
        let me = ThreadKey::current();
        self.write_intent_thread.store(me);
        self.write_thread.store(me);
        tracing::trace!(thread = me.as_u64(), "write intent acquired");
        Ok(())
    }

    /// Release write intent. Any write must be fully released first.
    pub fn write_intent_unlock(&self) -> LockResult<()> {
        if !self.write_intent_thread.is_current() {
            return Err(IllegalState::IntentNotHeld.into());
        }
        if self.write_requested.load(Ordering::SeqCst) || self.write_acquired.load(Ordering::SeqCst) {
            return Err(IllegalState::WriteHeldOnIntentRelease.into());
        }
        self.write_thread.store(self.bound_write_thread.load());
        self.write_intent_thread.store(ThreadKey::NONE);
        self.intent.unlock();
        tracing::trace!("write intent released");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn reclaim_due(&self) -> bool {
        let now = u64::try_from(self.created.elapsed().as_micros()).unwrap_or(u64::MAX);
        let last = self.last_reclaim_us.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.config.reclaim_interval_us {
            return false;
        }
        self.last_reclaim_us.store(now, Ordering::Relaxed);
        true
    }

    /// Drop records of threads that have exited. Returns how many were removed.
    pub fn reclaim_dead_readers(&self) -> usize {
        let removed = self.readers.remove_dead();
        if removed > 0 {
            self.reclaimed_total.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "reclaimed dead reader records");
        }
        removed
    }

    pub fn diagnostics(&self) -> LockDiagnostics {
        let counts = self.readers.counts();
        LockDiagnostics {
            registered_readers: counts.registered,
            active_readers: counts.active,
            blocked_readers: counts.blocked,
            dead_readers: counts.dead,
            write_requested: self.write_requested.load(Ordering::SeqCst),
            write_acquired: self.write_acquired.load(Ordering::SeqCst),
            write_intent_held: self.intent.is_locked(),
            intent_waiters: self.intent.waiting(),
            write_suspended: self.write_suspended.load(Ordering::SeqCst),
            reclaimed_total: self.reclaimed_total.load(Ordering::Relaxed),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_write_thread(&self) -> bool {
        self.write_thread.is_current()
    }

    pub fn is_write_locked(&self) -> bool {
        self.write_acquired.load(Ordering::SeqCst)
    }

    pub fn is_write_requested(&self) -> bool {
        self.write_requested.load(Ordering::SeqCst)
    }

    pub fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::SeqCst)
    }

    pub fn holds_write_intent(&self) -> bool {
        self.write_intent_thread.is_current()
    }

    pub fn is_read_locked_by_this_thread(&self) -> bool {
        self.readers
            .current_if_registered()
            .is_some_and(|r| r.is_read_requested())
    }

    pub fn is_in_impatient_reader(&self) -> bool {
        self.readers
            .current_if_registered()
            .is_some_and(|r| r.is_impatient())
    }
}

impl Default for ReaderSetLock {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl fmt::Debug for ReaderSetLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSetLock")
            .field("write_thread", &self.write_thread.load())
            .field("diagnostics", &self.diagnostics())
            .finish_non_exhaustive()
    }
}

impl LockBackend for ReaderSetLock {
    type ReadToken = ReadToken;

    fn acquire_read(&self) -> LockResult<ReadToken> {
        self.start_read()
    }

    fn try_acquire_read(&self) -> Option<ReadToken> {
        self.start_try_read()
    }

    fn release_read(&self, token: ReadToken) -> LockResult<()> {
        self.end_read(token)
    }

    fn acquire_write(&self) -> LockResult<()> {
        self.write_lock()
    }

    fn release_write(&self) -> LockResult<()> {
        self.write_unlock()
    }

    fn acquire_write_intent(&self) -> LockResult<()> {
        self.write_intent_lock()
    }

    fn release_write_intent(&self) -> LockResult<()> {
        self.write_intent_unlock()
    }

    fn begin_write_suspend(&self) -> LockResult<bool> {
        self.write_suspend()
    }

    fn end_write_suspend(&self, was_suspended: bool) -> LockResult<()> {
        self.write_resume(was_suspended)
    }

    fn run_impatient<R, F>(&self, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.execute_by_impatient_reader(action)
    }

    fn is_write_thread(&self) -> bool {
        ReaderSetLock::is_write_thread(self)
    }

    fn is_write_locked(&self) -> bool {
        ReaderSetLock::is_write_locked(self)
    }

    fn is_read_locked_by_current_thread(&self) -> bool {
        self.is_read_locked_by_this_thread()
    }

    fn is_in_impatient_reader(&self) -> bool {
        ReaderSetLock::is_in_impatient_reader(self)
    }
}
