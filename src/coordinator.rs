// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Two-phase write protocol on top of a `LockBackend`:
//
//     Idle -> IntentHeld -> WriteHeld -> IntentHeld -> Idle
//
// A write is always entered from intent and unwound back to it. Backends that
// collapse intent and write (`has_distinct_intent() == false`) already hold
// the exclusive permit while in IntentHeld, so the write transition only
// updates the state there. The exception is a suspended write: the backend
// permit is gone for the duration, and writes nested inside the suspension
// take it again. The backend permit is therefore not enough to keep intent
// exclusive on such backends, so the coordinator holds its own intent flag
// for them, kept from acquire to release.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{LockBackend, WriteSuspension};
use crate::cancel::NeverCancelled;
use crate::intent::IntentFlag;
use crate::thread_key::AtomicThreadKey;
use crate::{IllegalState, LockConfig, LockResult, ThreadKey};

/// Where the coordinator is in the intent/write protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentState {
    Idle = 0,
    IntentHeld = 1,
    WriteHeld = 2,
}

impl IntentState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IntentState::IntentHeld,
            2 => IntentState::WriteHeld,
            _ => IntentState::Idle,
        }
    }
}

/// Drives a backend through intent and write for the single write thread.
pub struct WriteIntentCoordinator<L: LockBackend> {
    lock: Arc<L>,
    state: AtomicU8,
    owner: AtomicThreadKey,
    suspensions: AtomicUsize,
    // Intent for backends without a distinct intent state.
    gate: IntentFlag,
    config: LockConfig,
}

impl<L: LockBackend> WriteIntentCoordinator<L> {
    pub fn new(lock: Arc<L>) -> Self {
        Self::with_config(lock, LockConfig::default())
    }

    /// `config` tunes the wait on the coordinator's own intent flag.
    pub fn with_config(lock: Arc<L>, config: LockConfig) -> Self {
        Self {
            lock,
            state: AtomicU8::new(IntentState::Idle as u8),
            owner: AtomicThreadKey::none(),
            suspensions: AtomicUsize::new(0),
            gate: IntentFlag::new(),
            config,
        }
    }

    pub fn lock(&self) -> &Arc<L> {
        &self.lock
    }

    pub fn state(&self) -> IntentState {
        IntentState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: IntentState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether the calling thread holds write intent.
    pub fn holds_intent(&self) -> bool {
        self.owner.is_current()
    }

    /// Whether the calling thread holds the write.
    pub fn holds_write(&self) -> bool {
        self.holds_intent() && self.state() == IntentState::WriteHeld
    }

    fn check_holder(&self) -> LockResult<()> {
        if self.owner.is_current() {
            Ok(())
        } else {
            Err(IllegalState::IntentNotHeld.into())
        }
    }

    fn write_goes_to_backend(&self) -> bool {
        self.lock.has_distinct_intent() || self.suspensions.load(Ordering::SeqCst) > 0
    }

    fn gated(&self) -> bool {
        !self.lock.has_distinct_intent()
    }

    /// Idle -> IntentHeld. Blocks while another thread holds intent, also
    /// while that thread has its write suspended.
    pub fn acquire_intent(&self) -> LockResult<()> {
        if self.owner.is_current() {
            return Err(IllegalState::IntentStateViolation.into());
        }
        if self.gated() {
            self.gate.lock(&self.config, &NeverCancelled)?;
        }
        if let Err(e) = self.lock.acquire_write_intent() {
            if self.gated() {
                self.gate.unlock();
            }
            return Err(e);
        }
        self.owner.store(ThreadKey::current());
        self.set_state(IntentState::IntentHeld);
        Ok(())
    }

    /// IntentHeld -> Idle.
    pub fn release_intent(&self) -> LockResult<()> {
        self.check_holder()?;
        match self.state() {
            IntentState::WriteHeld => return Err(IllegalState::WriteHeldOnIntentRelease.into()),
            IntentState::Idle => return Err(IllegalState::IntentStateViolation.into()),
            IntentState::IntentHeld => {}
        }
        if self.suspensions.load(Ordering::SeqCst) > 0 {
            return Err(IllegalState::IntentStateViolation.into());
        }
        self.set_state(IntentState::Idle);
        self.owner.store(ThreadKey::NONE);
        if let Err(e) = self.lock.release_write_intent() {
            self.owner.store(ThreadKey::current());
            self.set_state(IntentState::IntentHeld);
            return Err(e);
        }
        if self.gated() {
            self.gate.unlock();
        }
        Ok(())
    }

    /// IntentHeld -> WriteHeld.
    pub fn acquire_write(&self) -> LockResult<()> {
        self.check_holder()?;
        match self.state() {
            IntentState::IntentHeld => {}
            IntentState::WriteHeld => return Err(IllegalState::WriteAlreadyRequested.into()),
            IntentState::Idle => return Err(IllegalState::IntentStateViolation.into()),
        }
        if self.write_goes_to_backend() {
            self.lock.acquire_write()?;
        }
        self.set_state(IntentState::WriteHeld);
        Ok(())
    }

    /// WriteHeld -> IntentHeld.
    pub fn release_write(&self) -> LockResult<()> {
        self.check_holder()?;
        if self.state() != IntentState::WriteHeld {
            return Err(IllegalState::WriteNotHeld.into());
        }
        if self.write_goes_to_backend() {
            self.lock.release_write()?;
        }
        self.set_state(IntentState::IntentHeld);
        Ok(())
    }

    /// Run `f` holding intent. A thread that already holds intent just runs
    /// `f`; otherwise intent is taken for the call and released afterwards,
    /// also when `f` unwinds.
    pub fn run_intended_write<R>(&self, f: impl FnOnce() -> R) -> LockResult<R> {
        if self.holds_intent() {
            return Ok(f());
        }
        self.acquire_intent()?;
        let _release = ReleaseIntent { coordinator: self };
        Ok(f())
    }

    /// WriteHeld -> IntentHeld until the returned suspension is resumed or
    /// dropped, which takes the write back.
    pub fn suspend_write(&self) -> LockResult<IntentSuspension<'_, L>> {
        self.check_holder()?;
        if self.state() != IntentState::WriteHeld {
            return Err(IllegalState::WriteNotHeld.into());
        }
        let inner = self.lock.suspend_write()?;
        self.suspensions.fetch_add(1, Ordering::SeqCst);
        self.set_state(IntentState::IntentHeld);
        Ok(IntentSuspension {
            coordinator: self,
            inner: Some(inner),
        })
    }
}

impl<L: LockBackend> std::fmt::Debug for WriteIntentCoordinator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteIntentCoordinator")
            .field("state", &self.state())
            .field("owner", &self.owner.load())
            .field("suspensions", &self.suspensions.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct ReleaseIntent<'a, L: LockBackend> {
    coordinator: &'a WriteIntentCoordinator<L>,
}

impl<L: LockBackend> Drop for ReleaseIntent<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.coordinator.release_intent() {
            tracing::error!(error = %e, "failed to release write intent");
        }
    }
}

/// A write suspended through [`WriteIntentCoordinator::suspend_write`].
#[must_use = "dropping the suspension immediately re-acquires the write lock"]
pub struct IntentSuspension<'a, L: LockBackend> {
    coordinator: &'a WriteIntentCoordinator<L>,
    inner: Option<WriteSuspension<'a, L>>,
}

impl<L: LockBackend> IntentSuspension<'_, L> {
    /// Re-acquire the write. On failure the coordinator stays in IntentHeld.
    pub fn resume(mut self) -> LockResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> LockResult<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };
        let result = inner.resume();
        self.coordinator.suspensions.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.coordinator.set_state(IntentState::WriteHeld);
        }
        result
    }
}

impl<L: LockBackend> Drop for IntentSuspension<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!(error = %e, "failed to re-acquire suspended write lock");
        }
    }
}
