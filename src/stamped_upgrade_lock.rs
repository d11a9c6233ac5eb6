// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Coarse-grained backend over `StampedRwLock`.
//
// Shallow reentrancy comes from a set of reader thread keys: a thread that is
// already registered gets the sentinel token and nothing is acquired. There is
// no impatience and no distinct intent phase; write intent is the write lock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::LockBackend;
use crate::cancel::WriteBoundaryHooks;
use crate::stamped::{Stamp, StampedRwLock};
use crate::thread_key::AtomicThreadKey;
use crate::{IllegalState, LockResult, ThreadKey};

/// Read token of a [`StampedUpgradeLock`].
#[must_use = "read tokens must be passed back to end_read"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampToken {
    /// Already covered by an outer read or by the held write; releasing it
    /// does nothing.
    Reentrant,
    /// A shared permit to hand back.
    Read(Stamp),
}

impl StampToken {
    pub fn is_sentinel(self) -> bool {
        matches!(self, StampToken::Reentrant)
    }
}

/// Read/write lock built on a stamped primitive.
#[derive(Debug, Default)]
pub struct StampedUpgradeLock {
    lock: StampedRwLock,
    readers: Mutex<HashSet<ThreadKey>>,
    write_thread: AtomicThreadKey,
    write_stamp: AtomicU64,
    write_suspended: AtomicBool,
    hooks: WriteBoundaryHooks,
}

impl StampedUpgradeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks fired when a suspended write resumes.
    pub fn write_boundary_hooks(&self) -> &WriteBoundaryHooks {
        &self.hooks
    }

    /// Acquire a shared permit, blocking while a write is pending or held.
    pub fn start_read(&self) -> StampToken {
        let me = ThreadKey::current();
        if self.write_thread.load() == me || self.readers.lock().contains(&me) {
            return StampToken::Reentrant;
        }
        let stamp = self.lock.read();
        self.readers.lock().insert(me);
        StampToken::Read(stamp)
    }

    /// `None` if a write is currently pending or held; otherwise a read.
    pub fn start_try_read(&self) -> Option<StampToken> {
        if self.write_thread.is_current() {
            return Some(StampToken::Reentrant);
        }
        if self.lock.is_write_locked() {
            return None;
        }
        Some(self.start_read())
    }

    pub fn end_read(&self, token: StampToken) -> LockResult<()> {
        let StampToken::Read(stamp) = token else {
            return Ok(());
        };
        if !self.readers.lock().remove(&ThreadKey::current()) {
            return Err(IllegalState::ForeignReadToken.into());
        }
        if !self.lock.unlock_read(stamp) {
            return Err(IllegalState::ForeignReadToken.into());
        }
        Ok(())
    }

    /// Acquire the exclusive permit; the caller becomes the write thread.
    pub fn write_lock(&self) -> LockResult<()> {
        let me = ThreadKey::current();
        if self.write_thread.load() == me {
            return Err(IllegalState::WriteAlreadyRequested.into());
        }
        if self.readers.lock().contains(&me) {
            // Would wait on our own read permit forever.
            return Err(IllegalState::ReadHeldOnWrite.into());
        }
        let stamp = self.lock.write();
        self.write_stamp.store(stamp.raw(), Ordering::SeqCst);
        self.write_thread.store(me);
        Ok(())
    }

    pub fn write_unlock(&self) -> LockResult<()> {
        if self.write_thread.load().is_none() {
            return Err(IllegalState::WriteNotHeld.into());
        }
        if !self.write_thread.is_current() {
            return Err(IllegalState::NotWriteThread.into());
        }
        let stamp = self.stamp_of_held_write();
        self.write_thread.store(ThreadKey::NONE);
        if !self.lock.unlock_write(stamp) {
            return Err(IllegalState::WriteNotHeld.into());
        }
        Ok(())
    }

    fn stamp_of_held_write(&self) -> Stamp {
        // Only ever holds stamps produced by `StampedRwLock::write`.
        Stamp::from_raw(self.write_stamp.load(Ordering::SeqCst))
    }

    pub fn is_write_thread(&self) -> bool {
        self.write_thread.is_current()
    }

    pub fn is_write_locked(&self) -> bool {
        !self.write_thread.load().is_none()
    }

    pub fn is_read_locked_by_this_thread(&self) -> bool {
        self.readers.lock().contains(&ThreadKey::current())
    }

    pub fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::SeqCst)
    }

    /// Number of threads currently holding a shared permit.
    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }
}

impl LockBackend for StampedUpgradeLock {
    type ReadToken = StampToken;

    fn acquire_read(&self) -> LockResult<StampToken> {
        Ok(self.start_read())
    }

    fn try_acquire_read(&self) -> Option<StampToken> {
        self.start_try_read()
    }

    fn release_read(&self, token: StampToken) -> LockResult<()> {
        self.end_read(token)
    }

    fn acquire_write(&self) -> LockResult<()> {
        self.write_lock()
    }

    fn release_write(&self) -> LockResult<()> {
        self.write_unlock()
    }

    fn acquire_write_intent(&self) -> LockResult<()> {
        self.write_lock()
    }

    fn release_write_intent(&self) -> LockResult<()> {
        self.write_unlock()
    }

    fn has_distinct_intent(&self) -> bool {
        false
    }

    fn begin_write_suspend(&self) -> LockResult<bool> {
        if !self.write_thread.is_current() {
            return Err(IllegalState::NotWriteThread.into());
        }
        let previous = self.write_suspended.swap(true, Ordering::SeqCst);
        if let Err(e) = self.write_unlock() {
            self.write_suspended.store(previous, Ordering::SeqCst);
            return Err(e);
        }
        Ok(previous)
    }

    fn end_write_suspend(&self, was_suspended: bool) -> LockResult<()> {
        self.hooks.fire();
        let result = self.write_lock();
        self.write_suspended.store(was_suspended, Ordering::SeqCst);
        result
    }

    fn run_impatient<R, F>(&self, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        action()
    }

    fn is_write_thread(&self) -> bool {
        StampedUpgradeLock::is_write_thread(self)
    }

    fn is_write_locked(&self) -> bool {
        StampedUpgradeLock::is_write_locked(self)
    }

    fn is_read_locked_by_current_thread(&self) -> bool {
        self.is_read_locked_by_this_thread()
    }

    fn is_in_impatient_reader(&self) -> bool {
        false
    }
}
