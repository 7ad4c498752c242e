//! Error types for the storage layer.

use thiserror::Error;
use tkkt_core::{ClockError, CodecError, Dataset, SchemaError, ValueKind};
use tkkt_merkle::DigestError;

/// Errors that can occur in database operations.
#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Storage error: {0}")]
    Storage(String),

    /// A transaction was rolled back; the log and views are unchanged and
    /// the call can be retried.
    #[error("Apply failed: {0}")]
    ApplyFailed(String),

    #[error("Unknown column {column:?} for dataset {dataset}")]
    UnknownColumn { dataset: Dataset, column: String },

    #[error("Type mismatch for {dataset}.{column}: expected {expected}, found {found}")]
    TypeMismatch {
        dataset: Dataset,
        column: String,
        expected: String,
        found: String,
    },

    #[error("Unknown dataset {0:?}")]
    UnknownDataset(String),

    #[error("Storage queue closed")]
    QueueClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DbError {
    fn type_mismatch(dataset: Dataset, column: String, expected: ValueKind, found: &str) -> Self {
        DbError::TypeMismatch {
            dataset,
            column,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

impl From<SchemaError> for DbError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownColumn { dataset, column } => {
                DbError::UnknownColumn { dataset, column }
            }
            SchemaError::TypeMismatch {
                dataset,
                column,
                expected,
                found,
            } => DbError::type_mismatch(dataset, column, expected, &found.to_string()),
            SchemaError::NullNotAllowed { dataset, column } => {
                let expected = dataset
                    .column(&column)
                    .map(|spec| spec.kind)
                    .unwrap_or(ValueKind::Text);
                DbError::type_mismatch(dataset, column, expected, "null")
            }
            SchemaError::UnknownDataset(name) => DbError::UnknownDataset(name),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
