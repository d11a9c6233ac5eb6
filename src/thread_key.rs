// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Numeric per-thread identity. `std::thread::ThreadId` cannot be stored in an
// atomic, so every thread lazily draws a non-zero key from a global counter;
// `0` is reserved for "no thread".

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static KEY: Cell<u64> = const { Cell::new(0) };
}

/// Identity of a thread, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey(u64);

impl ThreadKey {
    /// Sentinel meaning "no thread".
    pub const NONE: ThreadKey = ThreadKey(0);

    /// Key of the calling thread.
    pub fn current() -> Self {
        KEY.with(|k| {
            let mut key = k.get();
            if key == 0 {
                key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
                k.set(key);
            }
            ThreadKey(key)
        })
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        ThreadKey(raw)
    }
}

/// An optional `ThreadKey` stored in a single atomic word.
#[derive(Debug, Default)]
pub(crate) struct AtomicThreadKey(AtomicU64);

impl AtomicThreadKey {
    pub(crate) const fn none() -> Self {
        Self(AtomicU64::new(0))
    }

    pub(crate) fn load(&self) -> ThreadKey {
        ThreadKey::from_raw(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, key: ThreadKey) {
        self.0.store(key.as_u64(), Ordering::SeqCst);
    }

    pub(crate) fn is_current(&self) -> bool {
        self.load() == ThreadKey::current()
    }

    /// Install `key` only if the slot is empty. Returns the previous key on failure.
    pub(crate) fn claim(&self, key: ThreadKey) -> Result<(), ThreadKey> {
        self.0
            .compare_exchange(0, key.as_u64(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ThreadKey::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable_and_non_zero() {
        let a = ThreadKey::current();
        assert!(!a.is_none());
        assert_eq!(a, ThreadKey::current());
    }

    #[test]
    fn threads_get_distinct_keys() {
        let here = ThreadKey::current();
        let there = std::thread::spawn(ThreadKey::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn claim_only_succeeds_on_empty_slot() {
        let slot = AtomicThreadKey::none();
        let me = ThreadKey::current();
        assert!(slot.claim(me).is_ok());
        assert!(slot.is_current());
        assert_eq!(slot.claim(ThreadKey::from_raw(u64::MAX)), Err(me));
        slot.store(ThreadKey::NONE);
        assert!(slot.load().is_none());
    }
}
