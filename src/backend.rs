// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The narrow interface collaborators use to take the lock, implemented by
// both `ReaderSetLock` and `StampedUpgradeLock`, plus the scoped resource that
// re-acquires a suspended write.

use std::marker::PhantomData;

use crate::LockResult;

/// Acquire/release surface shared by the lock backends.
///
/// Write and write-intent operations are reserved for the write thread;
/// calling them elsewhere fails with `LockError::IllegalState`.
pub trait LockBackend: Send + Sync {
    /// Proof of a read acquisition, handed back to [`release_read`](Self::release_read).
    type ReadToken;

    /// Acquire the read lock, waiting if a write is pending.
    ///
    /// # Errors
    /// `CannotAcquireReadLock` for an impatient reader facing a pending write;
    /// `OperationCancelled` if cancellation is observed while waiting.
    fn acquire_read(&self) -> LockResult<Self::ReadToken>;

    /// One attempt without waiting. `None` means not acquired.
    fn try_acquire_read(&self) -> Option<Self::ReadToken>;

    /// Release whatever [`acquire_read`](Self::acquire_read) returned.
    fn release_read(&self, token: Self::ReadToken) -> LockResult<()>;

    fn acquire_write(&self) -> LockResult<()>;

    fn release_write(&self) -> LockResult<()>;

    fn acquire_write_intent(&self) -> LockResult<()>;

    fn release_write_intent(&self) -> LockResult<()>;

    /// `false` when intent and write are the same state in this backend.
    fn has_distinct_intent(&self) -> bool {
        true
    }

    /// Release the held write and mark the lock suspended.
    /// Returns the previous suspended flag.
    fn begin_write_suspend(&self) -> LockResult<bool>;

    /// Fire write-boundary hooks, re-acquire the write and restore the
    /// suspended flag.
    fn end_write_suspend(&self, was_suspended: bool) -> LockResult<()>;

    /// Temporarily give up the held write; the returned resource takes it back.
    fn suspend_write(&self) -> LockResult<WriteSuspension<'_, Self>>
    where
        Self: Sized,
    {
        let was_suspended = self.begin_write_suspend()?;
        Ok(WriteSuspension::new(self, was_suspended))
    }

    /// Run `action` with fail-fast read semantics on this thread.
    fn run_impatient<R, F>(&self, action: F) -> R
    where
        F: FnOnce() -> R;

    fn is_write_thread(&self) -> bool;

    fn is_write_locked(&self) -> bool;

    fn is_read_locked_by_current_thread(&self) -> bool;

    fn is_in_impatient_reader(&self) -> bool;
}

/// A suspended write. [`resume`](Self::resume) (or drop) re-acquires it on
/// the write thread.
#[must_use = "dropping the suspension immediately re-acquires the write lock"]
pub struct WriteSuspension<'a, L: LockBackend + ?Sized> {
    lock: &'a L,
    was_suspended: bool,
    resumed: bool,
    // Must be resumed on the thread that suspended.
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: LockBackend + ?Sized> WriteSuspension<'a, L> {
    pub(crate) fn new(lock: &'a L, was_suspended: bool) -> Self {
        Self {
            lock,
            was_suspended,
            resumed: false,
            _not_send: PhantomData,
        }
    }

    /// Re-acquire the write lock and report the outcome.
    pub fn resume(mut self) -> LockResult<()> {
        self.resumed = true;
        self.lock.end_write_suspend(self.was_suspended)
    }
}

impl<L: LockBackend + ?Sized> Drop for WriteSuspension<'_, L> {
    fn drop(&mut self) {
        if self.resumed {
            return;
        }
        if let Err(e) = self.lock.end_write_suspend(self.was_suspended) {
            tracing::error!(error = %e, "failed to re-acquire suspended write lock");
        }
    }
}
