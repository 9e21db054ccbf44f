//! Structured error types for dataset operations.
//!
//! Every variant names the dataset, column or operation involved so the
//! message is actionable from a CLI or a log line without extra context.

use thiserror::Error;

/// Errors raised by the metadata model, dataset entity, transforms and storage.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid metadata for column '{column}': {reason}")]
    InvalidMetadata { column: String, reason: String },

    #[error("cannot apply {operation} to '{dataset}' column '{column}': {reason}")]
    IncompatibleTransform {
        dataset: String,
        column: String,
        operation: String,
        reason: String,
    },

    #[error("column '{column}' not found in dataset '{dataset}'")]
    ColumnNotFound { dataset: String, column: String },

    #[error("{operation} on '{dataset}' needs at least {required} observations, found {available}")]
    InsufficientData {
        dataset: String,
        operation: String,
        required: usize,
        available: usize,
    },

    #[error("window {window} of '{dataset}' is unusable for {operation}: {reason}")]
    InvalidWindow {
        dataset: String,
        operation: String,
        window: String,
        reason: String,
    },

    #[error("no {kind} series is available to convert '{dataset}'")]
    MissingAuxiliary { dataset: String, kind: String },

    #[error("decomposition of '{dataset}' column '{column}' failed: {primary}; fallback: {fallback}")]
    Decomposition {
        dataset: String,
        column: String,
        primary: String,
        fallback: String,
    },

    #[error("retrieval of '{name}' failed: {source}")]
    Retrieval {
        name: String,
        #[source]
        source: RetrievalError,
    },

    #[error("cached data for '{name}' is corrupt: {reason}")]
    CacheCorruption { name: String, reason: String },

    #[error("malformed data for '{dataset}': {reason}")]
    MalformedData { dataset: String, reason: String },

    #[error("unknown dataset '{name}'")]
    UnknownDataset { name: String },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("sql error: {0}")]
    SqlError(#[from] rusqlite::Error),

    #[error("registry error: {0}")]
    RegistryError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a [`crate::data::retriever::Retriever`].
///
/// `transient` marks failures worth retrying (timeouts, dropped connections).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RetrievalError {
    pub message: String,
    pub transient: bool,
}

impl RetrievalError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }
}

/// Why a metadata derivation is undefined for a column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeriveError(pub String);

impl DataError {
    /// True for corruption of a cache entry, which callers treat as a cache miss.
    pub fn is_cache_corruption(&self) -> bool {
        matches!(self, DataError::CacheCorruption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_dataset_and_column() {
        let err = DataError::ColumnNotFound {
            dataset: "cpi".into(),
            column: "core".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cpi"));
        assert!(msg.contains("core"));

        let err = DataError::IncompatibleTransform {
            dataset: "reserves".into(),
            column: "total".into(),
            operation: "resample".into(),
            reason: "cannot sum a stock series".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("resample"));
        assert!(msg.contains("reserves"));
        assert!(msg.contains("total"));
    }

    #[test]
    fn retrieval_error_keeps_source_message() {
        let err = DataError::Retrieval {
            name: "nxr".into(),
            source: RetrievalError::transient("connection reset"),
        };
        assert!(err.to_string().contains("connection reset"));
        assert!(err.to_string().contains("nxr"));
    }
}
