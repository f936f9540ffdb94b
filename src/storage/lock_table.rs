//! C3 — Object lock table: per-object-name exclusive locks, blocking,
//! FIFO-ish wake.
//!
//! Each entry is a control block holding a waiter count, a mutex, and a
//! condition variable; the control block is dropped from the table once the
//! last unlocker observes zero waiters, so an idle table never accumulates
//! dead entries. No timeout, no cancellation — callers must guarantee
//! forward progress themselves.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

struct ControlBlock {
    locked: Mutex<bool>,
    cond: Condvar,
    waiters: Mutex<usize>,
}

impl ControlBlock {
    fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            cond: Condvar::new(),
            waiters: Mutex::new(0),
        }
    }
}

/// A table of per-object exclusive locks, keyed by object name.
pub struct ObjectLockTable {
    entries: Mutex<HashMap<String, Arc<ControlBlock>>>,
}

impl Default for ObjectLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectLockTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn control_block(&self, id: &str) -> Arc<ControlBlock> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ControlBlock::new()))
            .clone()
    }

    /// Blocks until `id` becomes free, then acquires it exclusively.
    pub fn lock(&self, id: &str) -> ObjectLockGuard<'_> {
        let cb = self.control_block(id);
        *cb.waiters.lock().unwrap() += 1;
        let mut locked = cb.locked.lock().unwrap();
        while *locked {
            locked = cb.cond.wait(locked).unwrap();
        }
        *locked = true;
        drop(locked);
        *cb.waiters.lock().unwrap() -= 1;
        ObjectLockGuard {
            table: self,
            id: id.to_string(),
            cb,
        }
    }

    /// Point-in-time query; racy by construction, useful only as a hint.
    pub fn is_locked(&self, id: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some(cb) => *cb.locked.lock().unwrap(),
            None => false,
        }
    }

    fn unlock(&self, id: &str, cb: &Arc<ControlBlock>) {
        {
            let mut locked = cb.locked.lock().unwrap();
            *locked = false;
        }
        cb.cond.notify_one();
        if *cb.waiters.lock().unwrap() == 0 {
            let mut entries = self.entries.lock().unwrap();
            if let Some(existing) = entries.get(id) {
                if Arc::ptr_eq(existing, cb) && *cb.waiters.lock().unwrap() == 0 {
                    entries.remove(id);
                }
            }
        }
    }
}

/// RAII guard releasing the object lock on drop.
pub struct ObjectLockGuard<'a> {
    table: &'a ObjectLockTable,
    id: String,
    cb: Arc<ControlBlock>,
}

impl Drop for ObjectLockGuard<'_> {
    fn drop(&mut self) {
        self.table.unlock(&self.id, &self.cb);
    }
}
