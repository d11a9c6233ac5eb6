// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-thread reader records and the registry a writer scans.
//
// Each (thread, lock) pair owns one `ReaderRecord`. Its flags are written
// only by the owning thread and read by the writer. Records are created
// lazily on the first read attempt, cached in thread-local storage and
// appended to the lock's registry; they leave the registry only through the
// writer's dead-reader sweep.
//
// A record is dead once its thread's thread-local storage has been torn down,
// which happens on every thread exit (normal return or unwinding).
//
// Reads issued after that teardown (from another thread-local destructor) get
// a detached record that is never cached. It counts as dead as soon as the
// registry holds the only reference, that is once its read token is released
// or dropped. A detached read that is leaked instead still blocks writers.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use parking_lot::RwLock;

use crate::ThreadKey;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Reader-side state of one thread for one lock.
#[derive(Debug)]
pub struct ReaderRecord {
    registry_id: u64,
    owner: ThreadKey,
    thread: Thread,
    read_requested: AtomicBool,
    blocked: AtomicBool,
    impatient_reads: AtomicBool,
    alive: AtomicBool,
    detached: bool,
}

impl ReaderRecord {
    fn new(registry_id: u64, detached: bool) -> Self {
        Self {
            registry_id,
            owner: ThreadKey::current(),
            thread: thread::current(),
            read_requested: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
            impatient_reads: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            detached,
        }
    }

    pub fn owner(&self) -> ThreadKey {
        self.owner
    }

    pub fn thread_name(&self) -> &str {
        self.thread.name().unwrap_or("<unnamed>")
    }

    pub fn is_read_requested(&self) -> bool {
        self.read_requested.load(Ordering::SeqCst)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn is_impatient(&self) -> bool {
        self.impatient_reads.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Active means the writer has to wait for it.
    pub fn is_active(&self) -> bool {
        self.is_alive() && self.is_read_requested()
    }

    /// Not cached in thread-local storage; see [`ReaderRegistry::current`].
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn registry_id(&self) -> u64 {
        self.registry_id
    }

    pub(crate) fn set_read_requested(&self, value: bool) {
        self.read_requested.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_blocked(&self, value: bool) {
        self.blocked.store(value, Ordering::SeqCst);
    }

    /// Returns the previous value.
    pub(crate) fn replace_impatient(&self, value: bool) -> bool {
        self.impatient_reads.swap(value, Ordering::SeqCst)
    }

    pub(crate) fn unpark(&self) {
        self.thread.unpark();
    }
}

// ---------------------------------------------------------------------------
// Thread-local cache of this thread's records, one per registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LocalRecords {
    records: RefCell<Vec<Arc<ReaderRecord>>>,
}

impl Drop for LocalRecords {
    fn drop(&mut self) {
        for record in self.records.get_mut().drain(..) {
            record.alive.store(false, Ordering::SeqCst);
        }
    }
}

thread_local! {
    static LOCAL_RECORDS: LocalRecords = LocalRecords::default();
}

// ---------------------------------------------------------------------------
// ReaderRegistry
// ---------------------------------------------------------------------------

/// Append-mostly set of every record ever created for one lock.
#[derive(Debug)]
pub(crate) struct ReaderRegistry {
    id: u64,
    records: RwLock<Vec<Arc<ReaderRecord>>>,
}

/// Counters gathered by one pass over the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegistryCounts {
    pub registered: usize,
    pub active: usize,
    pub blocked: usize,
    pub dead: usize,
}

impl ReaderRegistry {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            records: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The calling thread's record, created and registered on first use.
    pub(crate) fn current(&self) -> Arc<ReaderRecord> {
        let cached = LOCAL_RECORDS.try_with(|local| {
            let mut records = local.records.borrow_mut();
            if let Some(found) = records.iter().find(|r| r.registry_id == self.id) {
                return Arc::clone(found);
            }
            // Drop cached records whose lock is gone.
            records.retain(|r| Arc::strong_count(r) > 1);
            let record = self.register(false);
            records.push(Arc::clone(&record));
            record
        });
        // Thread-local storage is already torn down: hand out a detached record.
        cached.unwrap_or_else(|_| self.register(true))
    }

    /// The calling thread's record, without creating one.
    pub(crate) fn current_if_registered(&self) -> Option<Arc<ReaderRecord>> {
        LOCAL_RECORDS
            .try_with(|local| {
                local
                    .records
                    .borrow()
                    .iter()
                    .find(|r| r.registry_id == self.id)
                    .cloned()
            })
            .ok()
            .flatten()
    }

    fn register(&self, detached: bool) -> Arc<ReaderRecord> {
        let record = Arc::new(ReaderRecord::new(self.id, detached));
        self.records.write().push(Arc::clone(&record));
        record
    }

    // Only the owning thread ever clones a detached record, so once the
    // registry's reference is the last one it stays that way.
    fn is_live(record: &Arc<ReaderRecord>) -> bool {
        record.is_alive() && !(record.detached && Arc::strong_count(record) == 1)
    }

    fn is_active(record: &Arc<ReaderRecord>) -> bool {
        Self::is_live(record) && record.is_read_requested()
    }

    /// Writer-side scan: no live record has a read requested.
    pub(crate) fn all_idle(&self) -> bool {
        !self.records.read().iter().any(Self::is_active)
    }

    pub(crate) fn active_thread_names(&self) -> Vec<String> {
        self.records
            .read()
            .iter()
            .filter(|r| Self::is_active(r))
            .map(|r| r.thread_name().to_owned())
            .collect()
    }

    /// Wake every parked reader; returns the number of dead records seen.
    pub(crate) fn unpark_blocked(&self) -> usize {
        let mut dead = 0;
        for record in self.records.read().iter() {
            if record.is_blocked() {
                record.unpark();
            } else if !Self::is_live(record) {
                dead += 1;
            }
        }
        dead
    }

    /// Drop records of exited threads. Returns how many were removed.
    pub(crate) fn remove_dead(&self) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(Self::is_live);
        before - records.len()
    }

    pub(crate) fn counts(&self) -> RegistryCounts {
        let records = self.records.read();
        let mut counts = RegistryCounts {
            registered: records.len(),
            ..RegistryCounts::default()
        };
        for record in records.iter() {
            if !Self::is_live(record) {
                counts.dead += 1;
            } else if record.is_read_requested() {
                counts.active += 1;
            }
            if record.is_blocked() {
                counts.blocked += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_cached_per_registry() {
        let a = ReaderRegistry::new();
        let b = ReaderRegistry::new();
        let ra = a.current();
        assert!(Arc::ptr_eq(&ra, &a.current()));
        assert!(!Arc::ptr_eq(&ra, &b.current()));
        assert_eq!(a.counts().registered, 1);
        assert_eq!(ra.owner(), ThreadKey::current());
    }

    #[test]
    fn current_if_registered_does_not_create() {
        let reg = ReaderRegistry::new();
        assert!(reg.current_if_registered().is_none());
        let _ = reg.current();
        assert!(reg.current_if_registered().is_some());
    }

    #[test]
    fn exited_thread_record_is_dead_and_removable() {
        let reg = Arc::new(ReaderRegistry::new());
        let r2 = Arc::clone(&reg);
        thread::spawn(move || {
            r2.current().set_read_requested(true);
        })
        .join()
        .unwrap();

        let counts = reg.counts();
        assert_eq!(counts.registered, 1);
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.active, 0);
        assert!(reg.all_idle());
        assert_eq!(reg.remove_dead(), 1);
        assert_eq!(reg.counts().registered, 0);
    }

    #[test]
    fn detached_record_dies_with_its_last_handle() {
        let reg = ReaderRegistry::new();
        let record = reg.register(true);
        assert!(record.is_detached());
        record.set_read_requested(true);
        assert!(!reg.all_idle());
        assert_eq!(reg.counts().active, 1);

        drop(record);
        assert!(reg.all_idle());
        let counts = reg.counts();
        assert_eq!((counts.dead, counts.active), (1, 0));
        assert_eq!(reg.remove_dead(), 1);
        assert_eq!(reg.counts().registered, 0);
    }

    #[test]
    fn cached_record_is_not_detached() {
        let reg = ReaderRegistry::new();
        let record = reg.current();
        assert!(!record.is_detached());
        // The thread-local cache keeps it live without any outside handle.
        drop(record);
        assert_eq!(reg.counts().dead, 0);
        assert_eq!(reg.remove_dead(), 0);
    }

    #[test]
    fn active_reader_blocks_idle_scan() {
        let reg = ReaderRegistry::new();
        let me = reg.current();
        me.set_read_requested(true);
        assert!(!reg.all_idle());
        assert_eq!(reg.active_thread_names().len(), 1);
        me.set_read_requested(false);
        assert!(reg.all_idle());
    }
}
