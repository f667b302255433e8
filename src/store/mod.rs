//! Record store trait and implementations

mod json_file;
mod memory;
mod sqlite;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::types::{Result, TotalsRecord};

/// Read-modify-write step handed to [`TotalsStore::update`].
///
/// Receives the current record (or `None`) and returns whether the slot
/// changed and must be written back.
pub type Mutation<'a> = &'a mut dyn FnMut(&mut Option<TotalsRecord>) -> bool;

/// Durable home of the per-subject aggregate records
pub trait TotalsStore: Send + Sync {
    /// Backend name (e.g., "sqlite")
    fn name(&self) -> &str;

    /// Load one subject's record
    fn load(&self, subject: &str) -> Result<Option<TotalsRecord>>;

    /// Insert or replace a record keyed by its subject
    fn upsert(&self, record: &TotalsRecord) -> Result<()>;

    /// Load every decodable record. Undecodable ones are skipped with a warning.
    fn load_all(&self) -> Result<Vec<TotalsRecord>>;

    /// Every stored subject, including ones whose record is undecodable
    fn subjects(&self) -> Result<Vec<String>> {
        Ok(self.load_all()?.into_iter().map(|r| r.subject).collect())
    }

    /// Atomic read-modify-write of one subject's record.
    ///
    /// The default runs load → mutate → upsert and relies on the caller
    /// serializing writers for the subject. Backends that can hold a
    /// transaction or file lock across the sequence override this.
    /// Returns the record as it stands afterwards.
    fn update(&self, subject: &str, mutate: Mutation<'_>) -> Result<Option<TotalsRecord>> {
        let mut slot = self.load(subject)?;
        if mutate(&mut slot) {
            if let Some(record) = &slot {
                self.upsert(record)?;
            }
        }
        Ok(slot)
    }
}
