//! Relational "last write" ledger
//!
//! Records, per canonical series key, the timestamp of its most recent
//! accepted write. The ledger is best-effort bookkeeping: a failed upsert
//! must never undo or fail the store mutation that triggered it, so
//! callers log and continue. The cleanup service reads it back through
//! [`WriteLedger::stale_keys`].
//!
//! Schema is created lazily on the first record attempt and is idempotent:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS redis_timeseries_logger (
//!     series_name       TEXT PRIMARY KEY,
//!     last_updated_time INTEGER NOT NULL
//! );
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::LedgerError;
use crate::types::SeriesKey;

/// Default ledger table name
pub const DEFAULT_TABLE: &str = "redis_timeseries_logger";

/// SQLite-backed write ledger
///
/// One connection, serialized behind a mutex; every operation acquires the
/// connection for the duration of a single statement or transaction and
/// releases it on every exit path.
#[derive(Debug)]
pub struct WriteLedger {
    conn: Mutex<Connection>,
    table: String,
    schema_ready: AtomicBool,
}

impl WriteLedger {
    /// Open (or create) a ledger database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, DEFAULT_TABLE)
    }

    /// Open a ledger with a non-default table name
    pub fn open_with_table(
        path: impl AsRef<Path>,
        table: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, table)
    }

    /// In-memory ledger, mainly for tests
    pub fn in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?, DEFAULT_TABLE)
    }

    fn with_connection(conn: Connection, table: impl Into<String>) -> Result<Self, LedgerError> {
        let table = table.into();
        // Interpolated into SQL, so restrict to identifier characters.
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(LedgerError::InvalidTable(table));
        }

        Ok(Self {
            conn: Mutex::new(conn),
            table,
            schema_ready: AtomicBool::new(false),
        })
    }

    /// Table this ledger writes to
    pub fn table(&self) -> &str {
        &self.table
    }

    fn ensure_schema(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                     series_name       TEXT PRIMARY KEY,
                     last_updated_time INTEGER NOT NULL
                 )",
                self.table
            ),
            [],
        )?;
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Record a write against a series key
    ///
    /// Idempotent upsert: on conflict the last-write time is overwritten,
    /// never duplicated.
    pub fn record(&self, key: &str) -> Result<(), LedgerError> {
        let now_ms = Utc::now().timestamp_millis();
        let conn = self.conn.lock();
        self.ensure_schema(&conn)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (series_name, last_updated_time) VALUES (?1, ?2)
                 ON CONFLICT (series_name) DO UPDATE SET last_updated_time = excluded.last_updated_time",
                self.table
            ),
            params![key, now_ms],
        )?;
        debug!(key, last_write = now_ms, "ledger upsert");
        Ok(())
    }

    /// Every key whose last write is strictly older than the threshold
    pub fn stale_keys(&self, older_than_ms: i64) -> Result<Vec<SeriesKey>, LedgerError> {
        let conn = self.conn.lock();
        self.ensure_schema(&conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT series_name FROM {} WHERE last_updated_time < ?1",
            self.table
        ))?;
        let keys = stmt
            .query_map(params![older_than_ms], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Drop the row for a purged series key
    ///
    /// Returns whether a row was actually removed. Called by the cleanup
    /// service after a successful store-level deletion so the key stops
    /// reappearing in every future scan.
    pub fn forget(&self, key: &str) -> Result<bool, LedgerError> {
        let conn = self.conn.lock();
        self.ensure_schema(&conn)?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE series_name = ?1", self.table),
            params![key],
        )?;
        Ok(removed > 0)
    }

    /// Number of tracked keys
    pub fn len(&self) -> Result<usize, LedgerError> {
        let conn = self.conn.lock();
        self.ensure_schema(&conn)?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// True when no keys are tracked
    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_idempotent_upsert() {
        let ledger = WriteLedger::in_memory().unwrap();

        ledger.record("k").unwrap();
        ledger.record("k").unwrap();

        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_stale_keys_threshold_is_strict() {
        let ledger = WriteLedger::in_memory().unwrap();
        ledger.record("fresh").unwrap();

        let now = Utc::now().timestamp_millis();
        // Written within the window: not stale.
        assert!(ledger.stale_keys(now - 60_000).unwrap().is_empty());
        // A threshold ahead of the write time reports it.
        let stale = ledger.stale_keys(now + 60_000).unwrap();
        assert_eq!(stale, vec!["fresh".to_string()]);
    }

    #[test]
    fn test_forget_removes_row() {
        let ledger = WriteLedger::in_memory().unwrap();
        ledger.record("k").unwrap();

        assert!(ledger.forget("k").unwrap());
        assert!(!ledger.forget("k").unwrap());
        assert!(ledger.is_empty().unwrap());
    }

    #[test]
    fn test_schema_created_lazily() {
        let ledger = WriteLedger::in_memory().unwrap();
        // First touch is a read; schema must still come up.
        assert!(ledger.stale_keys(0).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = WriteLedger::with_connection(conn, "bad; DROP TABLE x").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTable(_)));
    }

    #[test]
    fn test_custom_table_name() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = WriteLedger::with_connection(conn, "series_audit").unwrap();
        ledger.record("k").unwrap();
        assert_eq!(ledger.table(), "series_audit");
        assert_eq!(ledger.len().unwrap(), 1);
    }
}
