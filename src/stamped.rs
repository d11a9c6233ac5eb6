// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-word stamped read-write lock.
// - Bits 0..31: count of shared (read) holders.
// - Bit 31 (W_FLAG): exclusive (write) lock requested or held.
// - Bits 32..64: version, bumped on every write release.
//
// A writer sets W_FLAG first and then waits for the reader count to drain,
// so a pending writer stops new readers (writer preference). Stamps carry the
// version they were issued under, which lets optimistic readers validate that
// no write happened in between.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use crate::backoff::adaptive_yield;

const READER_MASK: u64 = 0x0000_0000_7FFF_FFFF;
const W_FLAG: u64 = 0x0000_0000_8000_0000;
const VERSION_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const VERSION_SHIFT: u32 = 32;
const ORIGIN: u64 = 1 << VERSION_SHIFT;

/// Permit issued by [`StampedRwLock`]. A zero stamp is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp(u64);

impl Stamp {
    pub const INVALID: Stamp = Stamp(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn is_write(self) -> bool {
        self.0 & W_FLAG != 0
    }

    pub fn version(self) -> u32 {
        (self.0 >> VERSION_SHIFT) as u32
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Stamp(raw)
    }
}

/// A writer-preferring read-write lock whose permits are stamps.
#[derive(Debug)]
pub struct StampedRwLock {
    lc: AtomicU64,
}

impl StampedRwLock {
    /// Create a new unlocked lock.
    pub const fn new() -> Self {
        Self {
            lc: AtomicU64::new(ORIGIN),
        }
    }

    /// Acquire a shared (read) permit.
    pub fn read(&self) -> Stamp {
        let mut old = self.lc.load(Ordering::Acquire);
        let mut k = 0u32;
        loop {
            if old & W_FLAG != 0 || old & READER_MASK == READER_MASK {
                // writer pending/active, or reader count saturated
                adaptive_yield(&mut k);
                old = self.lc.load(Ordering::Acquire);
                continue;
            }
            match self
                .lc
                .compare_exchange_weak(old, old + 1, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Stamp(old & VERSION_MASK),
                Err(cur) => old = cur,
            }
        }
    }

    /// One non-blocking attempt at a shared permit.
    pub fn try_read(&self) -> Option<Stamp> {
        let old = self.lc.load(Ordering::Acquire);
        if old & W_FLAG != 0 || old & READER_MASK == READER_MASK {
            return None;
        }
        self.lc
            .compare_exchange(old, old + 1, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| Stamp(old & VERSION_MASK))
    }

    /// Release a shared permit. Returns `false` for a stamp this lock
    /// cannot have issued.
    pub fn unlock_read(&self, stamp: Stamp) -> bool {
        if !stamp.is_valid() || stamp.is_write() {
            return false;
        }
        self.lc
            .fetch_update(Ordering::Release, Ordering::Relaxed, |s| {
                (s & READER_MASK != 0).then(|| s - 1)
            })
            .is_ok()
    }

    /// Acquire the exclusive (write) permit.
    pub fn write(&self) -> Stamp {
        let mut k = 0u32;
        loop {
            let old = self.lc.fetch_or(W_FLAG, Ordering::AcqRel);
            if old & (W_FLAG | READER_MASK) == 0 {
                return Stamp((old & VERSION_MASK) | W_FLAG);
            }
            if old & W_FLAG == 0 {
                break; // readers present but no other writer, wait for them to drain
            }
            // another writer holds the lock
            adaptive_yield(&mut k);
        }
        let mut k = 0u32;
        loop {
            let cur = self.lc.load(Ordering::Acquire);
            if cur & READER_MASK == 0 {
                return Stamp((cur & VERSION_MASK) | W_FLAG);
            }
            adaptive_yield(&mut k);
        }
    }

    /// One non-blocking attempt at the exclusive permit.
    pub fn try_write(&self) -> Option<Stamp> {
        let old = self.lc.load(Ordering::Acquire);
        if old & (W_FLAG | READER_MASK) != 0 {
            return None;
        }
        self.lc
            .compare_exchange(old, old | W_FLAG, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| Stamp((old & VERSION_MASK) | W_FLAG))
    }

    /// Release the exclusive permit and advance the version.
    /// Returns `false` if `stamp` does not match the held write permit.
    pub fn unlock_write(&self, stamp: Stamp) -> bool {
        let cur = self.lc.load(Ordering::Acquire);
        if !stamp.is_write() || cur & W_FLAG == 0 || cur & VERSION_MASK != stamp.0 & VERSION_MASK {
            return false;
        }
        let mut next = (cur >> VERSION_SHIFT).wrapping_add(1) & 0xFFFF_FFFF;
        if next == 0 {
            next = 1;
        }
        self.lc.store(next << VERSION_SHIFT, Ordering::Release);
        true
    }

    /// A stamp for lock-free reading, or [`Stamp::INVALID`] while a writer
    /// is pending or active.
    pub fn try_optimistic_read(&self) -> Stamp {
        let s = self.lc.load(Ordering::Acquire);
        if s & W_FLAG != 0 {
            Stamp::INVALID
        } else {
            Stamp(s & VERSION_MASK)
        }
    }

    /// Whether no write has been requested since `stamp` was issued.
    pub fn validate(&self, stamp: Stamp) -> bool {
        if !stamp.is_valid() || stamp.is_write() {
            return false;
        }
        fence(Ordering::Acquire);
        self.lc.load(Ordering::Relaxed) & (VERSION_MASK | W_FLAG) == stamp.0
    }

    /// Whether a writer holds or is waiting for the exclusive permit.
    pub fn is_write_locked(&self) -> bool {
        self.lc.load(Ordering::Acquire) & W_FLAG != 0
    }

    pub fn reader_count(&self) -> u32 {
        (self.lc.load(Ordering::Acquire) & READER_MASK) as u32
    }
}

impl Default for StampedRwLock {
    fn default() -> Self {
        Self::new()
    }
}
