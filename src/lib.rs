// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process reader/writer locks for read-mostly state with a single
// designated write thread. Readers keep their state in per-thread records,
// writers are preferred, and a write-intent phase lets the write thread read
// freely before it starts mutating.

mod error;
pub use error::{IllegalState, LockError, LockResult};

mod config;
pub use config::LockConfig;

mod backoff;
pub use backoff::Backoff;

pub mod cancel;
pub use cancel::{
    is_in_non_cancelable_section, non_cancelable, CancelCheck, CancelFlag, NeverCancelled,
    WriteBoundaryHooks,
};

mod thread_key;
pub use thread_key::ThreadKey;

mod reader;
pub use reader::ReaderRecord;

mod intent;

mod reader_set_lock;
pub use reader_set_lock::{LockDiagnostics, ReadToken, ReaderSetLock};

mod stamped;
pub use stamped::{Stamp, StampedRwLock};

mod stamped_upgrade_lock;
pub use stamped_upgrade_lock::{StampToken, StampedUpgradeLock};

mod backend;
pub use backend::{LockBackend, WriteSuspension};

mod coordinator;
pub use coordinator::{IntentState, IntentSuspension, WriteIntentCoordinator};

mod actions;
pub use actions::{ActionRunner, WriteActionListener};
