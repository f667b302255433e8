//! Single-document JSON store
//!
//! All records live in one pretty-printed JSON file. Writers hold an
//! exclusive advisory lock on a sidecar `.lock` file across the whole
//! read-modify-write and replace the document atomically (temp file +
//! rename). Readers take a shared lock. Lock acquisition is bounded by a
//! timeout so a stuck writer surfaces as `StorageUnavailable`.
//!
//! Records are kept as raw JSON values and decoded one at a time, so a
//! single malformed entry only affects its own subject.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Mutation, TotalsStore};
use crate::types::{Result, TallyError, TotalsRecord};

const DOCUMENT_VERSION: u32 = 1;
const LOCK_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Serialize, Deserialize)]
struct TotalsDocument {
    version: u32,
    updated_at: i64,
    records: BTreeMap<String, serde_json::Value>,
}

impl TotalsDocument {
    fn empty() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            updated_at: 0,
            records: BTreeMap::new(),
        }
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    lock_timeout: Duration,
}

#[derive(Clone, Copy)]
enum LockKind {
    Shared,
    Exclusive,
}

/// Advisory lock released on drop
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl JsonFileStore {
    pub fn new(path: PathBuf, lock_timeout: Duration) -> Self {
        Self { path, lock_timeout }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn acquire(&self, kind: LockKind) -> Result<LockGuard> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TallyError::StorageUnavailable(format!("Failed to create store dir: {}", e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| TallyError::StorageUnavailable(format!("Failed to open lock: {}", e)))?;

        let start = Instant::now();
        loop {
            let attempt = match kind {
                LockKind::Shared => FileExt::try_lock_shared(&file),
                LockKind::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            if attempt.is_ok() {
                return Ok(LockGuard { file });
            }
            if start.elapsed() >= self.lock_timeout {
                return Err(TallyError::StorageUnavailable(format!(
                    "lock timed out after {:?} at {}",
                    start.elapsed(),
                    lock_path.display()
                )));
            }
            thread::sleep(LOCK_POLL);
        }
    }

    /// Read the document; a missing file is an empty store.
    fn read_document(&self) -> Result<TotalsDocument> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TotalsDocument::empty()),
            Err(e) => {
                return Err(TallyError::StorageUnavailable(format!(
                    "Failed to open store: {}",
                    e
                )))
            }
        };

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| TallyError::StorageUnavailable(format!("Failed to read store: {}", e)))?;
        if content.trim().is_empty() {
            return Ok(TotalsDocument::empty());
        }

        let document: TotalsDocument = serde_json::from_str(&content).map_err(|e| {
            TallyError::StorageUnavailable(format!(
                "Corrupted store file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if document.version != DOCUMENT_VERSION {
            return Err(TallyError::StorageUnavailable(format!(
                "Unsupported store version {} in {}",
                document.version,
                self.path.display()
            )));
        }
        Ok(document)
    }

    /// Save using atomic write (temp file + rename). Caller holds the exclusive lock.
    fn write_document(&self, document: &mut TotalsDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TallyError::StorageUnavailable(format!("Failed to create store dir: {}", e))
            })?;
        }
        document.updated_at = chrono::Utc::now().timestamp();

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| TallyError::StorageUnavailable(format!("Serialization failed: {}", e)))?;

        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&temp_path).map_err(|e| {
                TallyError::StorageUnavailable(format!("Failed to create temp file: {}", e))
            })?;
            file.write_all(content.as_bytes()).map_err(|e| {
                TallyError::StorageUnavailable(format!("Failed to write temp file: {}", e))
            })?;
            file.sync_all().map_err(|e| {
                TallyError::StorageUnavailable(format!("Failed to sync temp file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            TallyError::StorageUnavailable(format!("Failed to rename temp file: {}", e))
        })?;
        Ok(())
    }
}

fn decode(subject: &str, value: &serde_json::Value) -> Result<TotalsRecord> {
    let record: TotalsRecord =
        serde_json::from_value(value.clone()).map_err(|e| TallyError::Corrupt {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;
    if record.subject != subject {
        return Err(TallyError::Corrupt {
            subject: subject.to_string(),
            reason: format!("stored under a different subject ({})", record.subject),
        });
    }
    Ok(record)
}

/// JSON has no representation for non-finite numbers (serde_json writes `null`)
fn encode(record: &TotalsRecord) -> Result<serde_json::Value> {
    let totals = [
        record.total_all,
        record.total_day,
        record.total_week,
        record.total_month,
    ];
    if totals.iter().any(|total| !total.is_finite()) {
        return Err(TallyError::InvalidObservation(format!(
            "refusing to store non-finite totals for {}",
            record.subject
        )));
    }
    serde_json::to_value(record)
        .map_err(|e| TallyError::StorageUnavailable(format!("Serialization failed: {}", e)))
}

impl TotalsStore for JsonFileStore {
    fn name(&self) -> &str {
        "json"
    }

    fn load(&self, subject: &str) -> Result<Option<TotalsRecord>> {
        let _lock = self.acquire(LockKind::Shared)?;
        let document = self.read_document()?;
        document
            .records
            .get(subject)
            .map(|value| decode(subject, value))
            .transpose()
    }

    fn upsert(&self, record: &TotalsRecord) -> Result<()> {
        let _lock = self.acquire(LockKind::Exclusive)?;
        let mut document = self.read_document()?;
        document
            .records
            .insert(record.subject.clone(), encode(record)?);
        self.write_document(&mut document)
    }

    fn load_all(&self) -> Result<Vec<TotalsRecord>> {
        let _lock = self.acquire(LockKind::Shared)?;
        let document = self.read_document()?;
        let mut records = Vec::with_capacity(document.records.len());
        for (subject, value) in &document.records {
            match decode(subject, value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(store = "json", %subject, "skipping record: {}", e),
            }
        }
        Ok(records)
    }

    fn subjects(&self) -> Result<Vec<String>> {
        let _lock = self.acquire(LockKind::Shared)?;
        Ok(self.read_document()?.records.into_keys().collect())
    }

    fn update(&self, subject: &str, mutate: Mutation<'_>) -> Result<Option<TotalsRecord>> {
        let _lock = self.acquire(LockKind::Exclusive)?;
        let mut document = self.read_document()?;
        let mut slot = document
            .records
            .get(subject)
            .map(|value| decode(subject, value))
            .transpose()?;

        if mutate(&mut slot) {
            if let Some(record) = &slot {
                document
                    .records
                    .insert(subject.to_string(), encode(record)?);
                self.write_document(&mut document)?;
            }
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(
            temp_dir.path().join("bet_totals.json"),
            Duration::from_millis(200),
        );
        (store, temp_dir)
    }

    // ========== contract tests ==========

    #[test]
    fn test_load_missing_is_none() {
        let (store, _temp) = create_test_store();
        contract::load_missing_is_none(&store);
    }

    #[test]
    fn test_upsert_then_load() {
        let (store, _temp) = create_test_store();
        contract::upsert_then_load(&store);
    }

    #[test]
    fn test_update_creates_and_skips_unchanged() {
        let (store, _temp) = create_test_store();
        contract::update_creates_and_skips_unchanged(&store);
    }

    #[test]
    fn test_subjects_sorted() {
        let (store, _temp) = create_test_store();
        contract::subjects_sorted(&store);
    }

    // ========== file format tests ==========

    #[test]
    fn test_document_survives_reopen() {
        let (store, temp) = create_test_store();
        store.upsert(&contract::record("alice", 42.0)).unwrap();

        let reopened = JsonFileStore::new(store.path().to_path_buf(), Duration::from_millis(200));
        let loaded = reopened.load("alice").unwrap().unwrap();
        assert_eq!(loaded.total_all, 42.0);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("bet_totals.json")).unwrap())
                .unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["records"]["alice"]["day_start"], "2024-06-01");
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (store, temp) = create_test_store();
        store.upsert(&contract::record("alice", 1.0)).unwrap();
        assert!(!temp.path().join("bet_totals.json.tmp").exists());
    }

    #[test]
    fn test_corrupted_document_is_unavailable() {
        let (store, _temp) = create_test_store();
        fs::write(store.path(), "not valid json {{{").unwrap();

        let err = store.load("alice").unwrap_err();
        assert!(matches!(err, TallyError::StorageUnavailable(_)));
    }

    #[test]
    fn test_corrupt_record_is_isolated() {
        let (store, _temp) = create_test_store();
        store.upsert(&contract::record("alice", 1.0)).unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        raw["records"]["mallory"] = serde_json::json!({ "subject": "mallory", "total_all": "x" });
        fs::write(store.path(), raw.to_string()).unwrap();

        assert!(matches!(
            store.load("mallory").unwrap_err(),
            TallyError::Corrupt { .. }
        ));
        assert_eq!(store.load_all().unwrap().len(), 1);
        assert_eq!(store.subjects().unwrap(), vec!["alice", "mallory"]);
    }

    #[test]
    fn test_lock_timeout_is_storage_unavailable() {
        let (store, _temp) = create_test_store();
        let held = store.acquire(LockKind::Exclusive).unwrap();

        // fs2 locks are per file handle, so a second handle contends even in-process
        let err = store.upsert(&contract::record("alice", 1.0)).unwrap_err();
        assert!(matches!(err, TallyError::StorageUnavailable(_)));
        assert!(err.is_retryable());

        drop(held);
        assert!(store.upsert(&contract::record("alice", 1.0)).is_ok());
    }

    #[test]
    fn test_non_finite_totals_are_not_written() {
        let (store, _temp) = create_test_store();
        store.upsert(&contract::record("alice", 1.0)).unwrap();

        let mut broken = contract::record("alice", 1.0);
        broken.total_all = f64::INFINITY;
        let err = store.upsert(&broken).unwrap_err();

        assert!(matches!(err, TallyError::InvalidObservation(_)));
        assert_eq!(store.load("alice").unwrap(), Some(contract::record("alice", 1.0)));
    }
}
