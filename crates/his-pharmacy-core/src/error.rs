//! Caller-facing error taxonomy.
//!
//! Every variant except [`CoreError::Database`] is a recoverable rejection of the request;
//! none of them leaves partial state behind because the operations that raise them run
//! inside a single SQLite transaction.

use thiserror::Error;

use crate::db::DbError;
use crate::models::ServiceRef;

/// Core errors.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Batch {batch_id} has insufficient stock: available {available}, required {required}")]
    InsufficientStock {
        batch_id: i64,
        available: i64,
        required: i64,
    },

    #[error("No valid batches available with sufficient stock for medicine {medicine_id} (quantity {quantity})")]
    NoEligibleBatch { medicine_id: i64, quantity: i64 },

    #[error("Batch {batch_id} cannot be dispensed: {reason}")]
    IneligibleBatch { batch_id: i64, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Requested {requested} units but only {remaining} remain undispensed")]
    OverDispense { requested: i64, remaining: i64 },

    #[error("Service already billed: {service}")]
    DuplicateBillItem { service: ServiceRef },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(DbError::Sqlite(e))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
