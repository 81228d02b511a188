use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Convenience result type for transform operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Error type returned by the loaders in [`crate::ingestion`].
///
/// This is a single error enum shared across CSV/JSON/Parquet (and optional Excel) ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "excel")]
    /// Excel ingestion error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// CSV ingestion error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON document could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parquet ingestion error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The input does not conform to the provided schema (missing required fields/columns, etc.).
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A value could not be parsed into the required [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },
}

/// Fatal, per-call error returned by transform operations.
///
/// A transform that returns one of these has not modified anything: configuration and schema
/// problems are detected before any row is processed, and the registry only appends lineage
/// after success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// A referenced column does not exist in the table.
    #[error("{operation}: column '{column}' not found")]
    Schema {
        operation: &'static str,
        column: String,
    },

    /// Invalid operator/function name or malformed parameter shape.
    #[error("{operation}: invalid configuration: {message}")]
    Config {
        operation: &'static str,
        message: String,
    },

    /// A value failed a coercion that was configured to be strict.
    #[error("failed to convert value at row {row} column '{column}' to {target} (raw='{raw}')")]
    TypeCoercion {
        column: String,
        row: usize,
        raw: String,
        target: String,
    },

    /// The registry has no dataset with this identifier.
    #[error("dataset '{id}' not found")]
    DatasetNotFound { id: String },
}

impl TransformError {
    pub(crate) fn schema(operation: &'static str, column: impl Into<String>) -> Self {
        Self::Schema {
            operation,
            column: column.into(),
        }
    }

    pub(crate) fn config(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            operation,
            message: message.into(),
        }
    }
}

/// A recoverable, per-item problem: the item (condition, column, rename, ...) was skipped and
/// the rest of the batch was still applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformWarning {
    /// Operation that produced the warning (`filter`, `clean`, `transform`, ...).
    pub operation: String,
    /// The column or item the warning is about.
    pub target: String,
    /// Human-readable reason.
    pub reason: String,
}

impl TransformWarning {
    /// Create a warning and log it.
    pub(crate) fn skipped(
        operation: &'static str,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let w = Self {
            operation: operation.to_string(),
            target: target.into(),
            reason: reason.into(),
        };
        tracing::warn!(operation, item = %w.target, "{}, skipping", w.reason);
        w
    }
}

impl fmt::Display for TransformWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}': {}", self.operation, self.target, self.reason)
    }
}
