//! In-process store, used by tests and embedders without persistence

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{Mutation, TotalsStore};
use crate::types::{Result, TotalsRecord};

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, TotalsRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records
    pub fn with_records(records: impl IntoIterator<Item = TotalsRecord>) -> Self {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.subject.clone(), r))
                    .collect(),
            ),
        }
    }
}

impl TotalsStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self, subject: &str) -> Result<Option<TotalsRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(subject).cloned())
    }

    fn upsert(&self, record: &TotalsRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.subject.clone(), record.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<TotalsRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    fn subjects(&self) -> Result<Vec<String>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.keys().cloned().collect())
    }

    fn update(&self, subject: &str, mutate: Mutation<'_>) -> Result<Option<TotalsRecord>> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut slot = records.get(subject).cloned();
        if mutate(&mut slot) {
            if let Some(record) = &slot {
                records.insert(subject.to_string(), record.clone());
            }
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_load_missing_is_none() {
        contract::load_missing_is_none(&MemoryStore::new());
    }

    #[test]
    fn test_upsert_then_load() {
        contract::upsert_then_load(&MemoryStore::new());
    }

    #[test]
    fn test_update_creates_and_skips_unchanged() {
        contract::update_creates_and_skips_unchanged(&MemoryStore::new());
    }

    #[test]
    fn test_subjects_sorted() {
        contract::subjects_sorted(&MemoryStore::new());
    }

    #[test]
    fn test_with_records_seeds_store() {
        let store = MemoryStore::with_records(vec![
            contract::record("alice", 1.0),
            contract::record("bob", 2.0),
        ]);
        assert_eq!(store.subjects().unwrap(), vec!["alice", "bob"]);
    }
}
