// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by both lock backends and the layers above them.
// `IllegalState` is a programming error; the other two variants are expected
// outcomes of a read acquisition and are part of its contract.

use thiserror::Error;

/// The specific misuse behind a [`LockError::IllegalState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalState {
    /// A write or write-intent operation was called off the write thread.
    NotWriteThread,
    /// `write_lock` was called while a write was already requested or held.
    WriteAlreadyRequested,
    /// `write_unlock` was called without a held write lock.
    WriteNotHeld,
    /// Intent was released by a thread that does not hold it.
    IntentNotHeld,
    /// Intent was released while a write was still requested or held.
    WriteHeldOnIntentRelease,
    /// A read token was released from the write thread.
    ReadReleasedFromWriteThread,
    /// A read token was released by a thread other than its owner, or
    /// against a lock that did not issue it.
    ForeignReadToken,
    /// Another thread is already bound as the write thread.
    WriteThreadAlreadyBound,
    /// A write-intent state transition was attempted from the wrong state.
    IntentStateViolation,
    /// A write was requested by a thread that still holds a read permit.
    ReadHeldOnWrite,
}

impl std::fmt::Display for IllegalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NotWriteThread => "operation is only allowed on the write thread",
            Self::WriteAlreadyRequested => "write lock is not reentrant",
            Self::WriteNotHeld => "write lock is not held",
            Self::IntentNotHeld => "write intent is not held by the current thread",
            Self::WriteHeldOnIntentRelease => "write must be released before write intent",
            Self::ReadReleasedFromWriteThread => "read lock released from the write thread",
            Self::ForeignReadToken => "read token does not belong to the current thread",
            Self::WriteThreadAlreadyBound => "another thread is bound as the write thread",
            Self::IntentStateViolation => "invalid write-intent state transition",
            Self::ReadHeldOnWrite => "write requested while holding a read lock",
        };
        f.write_str(msg)
    }
}

/// Errors raised by lock acquisition and release.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// Programmer misuse. Never expected to be caught.
    #[error("illegal lock state: {0}")]
    IllegalState(IllegalState),

    /// An impatient reader found a write pending and gave up immediately.
    #[error("cannot acquire read lock: a write is pending")]
    CannotAcquireReadLock,

    /// External cancellation was observed while waiting for the lock.
    #[error("operation cancelled while waiting for the lock")]
    OperationCancelled,
}

impl LockError {
    /// `true` for the outcomes callers are expected to handle
    /// (`CannotAcquireReadLock`, `OperationCancelled`).
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::IllegalState(_))
    }
}

impl From<IllegalState> for LockError {
    fn from(state: IllegalState) -> Self {
        Self::IllegalState(state)
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
