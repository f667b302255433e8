//! SQLite store backed by a `bet_totals` table
//!
//! `update` runs inside a `BEGIN IMMEDIATE` transaction, so the
//! read-reconcile-write sequence is atomic even across processes sharing
//! the database file. Writers that cannot get the database within the
//! busy timeout fail with `StorageUnavailable`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::warn;

use super::{Mutation, TotalsStore};
use crate::types::{Result, TallyError, TotalsRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bet_totals (
    username    TEXT PRIMARY KEY NOT NULL,
    total_all   REAL NOT NULL DEFAULT 0,
    total_day   REAL NOT NULL DEFAULT 0,
    day_start   TEXT NOT NULL,
    total_week  REAL NOT NULL DEFAULT 0,
    week_start  TEXT NOT NULL,
    total_month REAL NOT NULL DEFAULT 0,
    month_start TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

const SELECT_COLUMNS: &str = "SELECT username, total_all, total_day, day_start, total_week, \
     week_start, total_month, month_start, updated_at FROM bet_totals";

const UPSERT: &str = "
INSERT INTO bet_totals (
    username, total_all, total_day, day_start, total_week, week_start,
    total_month, month_start, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(username) DO UPDATE SET
    total_all = excluded.total_all,
    total_day = excluded.total_day,
    day_start = excluded.day_start,
    total_week = excluded.total_week,
    week_start = excluded.week_start,
    total_month = excluded.total_month,
    month_start = excluded.month_start,
    updated_at = excluded.updated_at
";

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Raw column values before label/timestamp decoding
struct RawRow {
    username: String,
    total_all: f64,
    total_day: f64,
    day_start: Option<String>,
    total_week: f64,
    week_start: Option<String>,
    total_month: f64,
    month_start: Option<String>,
    updated_at: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            total_all: row.get(1)?,
            total_day: row.get(2)?,
            day_start: row.get(3)?,
            total_week: row.get(4)?,
            week_start: row.get(5)?,
            total_month: row.get(6)?,
            month_start: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<TotalsRecord> {
        let subject = self.username;
        let date = |column: &str, value: Option<String>| -> Result<NaiveDate> {
            let text = value.ok_or_else(|| TallyError::Corrupt {
                subject: subject.clone(),
                reason: format!("{} is NULL", column),
            })?;
            NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| TallyError::Corrupt {
                subject: subject.clone(),
                reason: format!("{} '{}': {}", column, text, e),
            })
        };

        let day_start = date("day_start", self.day_start)?;
        let week_start = date("week_start", self.week_start)?;
        let month_start = date("month_start", self.month_start)?;
        let updated_at = match self.updated_at {
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| TallyError::Corrupt {
                    subject: subject.clone(),
                    reason: format!("updated_at '{}': {}", text, e),
                })?,
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        Ok(TotalsRecord {
            subject,
            total_all: self.total_all,
            total_day: self.total_day,
            day_start,
            total_week: self.total_week,
            week_start,
            total_month: self.total_month,
            month_start,
            updated_at,
        })
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TallyError::StorageUnavailable(format!("Failed to create store dir: {}", e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, busy_timeout)
    }

    /// Open an in-memory database (used in tests)
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(1))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TallyError::StorageUnavailable("sqlite connection poisoned".into()))
    }

    #[cfg(test)]
    fn execute_raw(&self, sql: &str) {
        self.conn().unwrap().execute_batch(sql).unwrap();
    }
}

fn load_row(conn: &Connection, subject: &str) -> Result<Option<TotalsRecord>> {
    let sql = format!("{} WHERE username = ?1", SELECT_COLUMNS);
    let raw = conn
        .query_row(&sql, params![subject], RawRow::from_row)
        .optional()?;
    raw.map(RawRow::decode).transpose()
}

fn write_row(conn: &Connection, record: &TotalsRecord) -> Result<()> {
    conn.execute(
        UPSERT,
        params![
            record.subject,
            record.total_all,
            record.total_day,
            record.day_start.format(DATE_FORMAT).to_string(),
            record.total_week,
            record.week_start.format(DATE_FORMAT).to_string(),
            record.total_month,
            record.month_start.format(DATE_FORMAT).to_string(),
            record
                .updated_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    )?;
    Ok(())
}

impl TotalsStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn load(&self, subject: &str) -> Result<Option<TotalsRecord>> {
        let conn = self.conn()?;
        load_row(&conn, subject)
    }

    fn upsert(&self, record: &TotalsRecord) -> Result<()> {
        let conn = self.conn()?;
        write_row(&conn, record)
    }

    fn load_all(&self) -> Result<Vec<TotalsRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY username", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            match row?.decode() {
                Ok(record) => records.push(record),
                Err(e) => warn!(store = "sqlite", "skipping record: {}", e),
            }
        }
        Ok(records)
    }

    fn subjects(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT username FROM bet_totals ORDER BY username")?;
        let subjects = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subjects)
    }

    fn update(&self, subject: &str, mutate: Mutation<'_>) -> Result<Option<TotalsRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut slot = load_row(&tx, subject)?;
        if mutate(&mut slot) {
            if let Some(record) = &slot {
                write_row(&tx, record)?;
            }
        }
        tx.commit()?;
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::TempDir;

    // ========== contract tests ==========

    #[test]
    fn test_load_missing_is_none() {
        contract::load_missing_is_none(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_upsert_then_load() {
        contract::upsert_then_load(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_update_creates_and_skips_unchanged() {
        contract::update_creates_and_skips_unchanged(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_subjects_sorted() {
        contract::subjects_sorted(&SqliteStore::in_memory().unwrap());
    }

    // ========== row decoding tests ==========

    #[test]
    fn test_labels_stored_as_date_text() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert(&contract::record("alice", 5.0)).unwrap();

        let conn = store.conn().unwrap();
        let day_start: String = conn
            .query_row(
                "SELECT day_start FROM bet_totals WHERE username = 'alice'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(day_start, "2024-06-01");
    }

    #[test]
    fn test_corrupt_row_is_isolated() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert(&contract::record("alice", 1.0)).unwrap();
        store.execute_raw(
            "INSERT INTO bet_totals (username, day_start, week_start, month_start, updated_at)
             VALUES ('mallory', 'yesterday', '2024-05-26', '2024-05-30', '2024-06-01T00:00:00Z')",
        );

        let err = store.load("mallory").unwrap_err();
        assert!(matches!(err, TallyError::Corrupt { ref subject, .. } if subject == "mallory"));

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subject, "alice");
        assert_eq!(store.subjects().unwrap(), vec!["alice", "mallory"]);
    }

    #[test]
    fn test_reopen_file_database() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("bet_totals.db");
        {
            let store = SqliteStore::open(&path, Duration::from_millis(500)).unwrap();
            store.upsert(&contract::record("alice", 77.0)).unwrap();
        }
        let store = SqliteStore::open(&path, Duration::from_millis(500)).unwrap();
        let loaded = store.load("alice").unwrap().unwrap();
        assert_eq!(loaded, contract::record("alice", 77.0));
    }

    #[test]
    fn test_locked_database_is_storage_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bet_totals.db");
        let store = SqliteStore::open(&path, Duration::from_millis(50)).unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = store
            .update("alice", &mut |slot| {
                *slot = Some(contract::record("alice", 1.0));
                true
            })
            .unwrap_err();
        assert!(matches!(err, TallyError::StorageUnavailable(_)));

        blocker.execute_batch("ROLLBACK").unwrap();
        assert!(store.update("alice", &mut |_| false).is_ok());
    }
}
