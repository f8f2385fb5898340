//! Database layer for the pharmacy and billing core.

mod billing;
mod clinical;
mod inventory;
mod prescriptions;
mod schema;

pub use billing::*;
pub use clinical::*;
pub use inventory::*;
pub use prescriptions::*;
pub use schema::*;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::CoreConfig;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    config: CoreConfig,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_config(path, CoreConfig::default())
    }

    /// Open database at path with explicit configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: CoreConfig) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn, config };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open_in_memory_with_config(CoreConfig::default())
    }

    /// Create in-memory database with explicit configuration.
    pub fn open_in_memory_with_config(config: CoreConfig) -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, config };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn
            .busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Configuration this database was opened with.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Begin a write transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock before the first read, so a
    /// read-check-write sequence inside it cannot interleave with another writer.
    /// Dropping the transaction without committing rolls it back.
    pub fn write_transaction(&self) -> DbResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

/// Read a decimal stored as TEXT.
pub(crate) fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a nullable decimal stored as TEXT.
pub(crate) fn optional_decimal_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Decimal::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read an enum stored as its canonical string.
pub(crate) fn enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value: {}", text).into(),
        )
    })
}

/// Whether an error is a UNIQUE constraint failure.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        // Check that tables exist
        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for expected in [
            "medicines",
            "medicine_batches",
            "stock_transactions",
            "prescriptions",
            "prescription_dispenses",
            "bills",
            "bill_items",
            "visits",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_write_transaction_rolls_back_on_drop() {
        let db = Database::open_in_memory().unwrap();
        {
            let tx = db.write_transaction().unwrap();
            tx.execute(
                "INSERT INTO patients (name, created_at) VALUES ('Ghost', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        }
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("his.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO patients (name, created_at) VALUES ('Asha', '2024-01-01T00:00:00Z')",
                    [],
                )
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
