//! Per-subject mutual exclusion for read-reconcile-write sequences

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock table keyed by subject.
///
/// A slot lives only while some caller holds or waits on it, so the table
/// stays proportional to in-flight subjects rather than to all subjects.
#[derive(Default)]
pub struct SubjectLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `subject`
    pub fn with<T>(&self, subject: &str, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(subject.to_string()).or_default())
        };
        let release = SlotRelease {
            locks: self,
            subject,
            slot,
        };

        // Dropped before `release`, also when `f` unwinds
        let _held = lock(&release.slot);
        f()
    }

    /// Number of subjects currently held or awaited
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Removes the subject's slot once nobody else holds or waits on it
struct SlotRelease<'a> {
    locks: &'a SubjectLocks,
    subject: &'a str,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        let mut slots = lock(&self.locks.slots);
        // Table entry + ours: nobody else is waiting
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(self.subject);
        }
    }
}

/// A panic inside one subject's critical section must not wedge the others.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
