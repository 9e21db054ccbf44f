//! Errors from the reconciliation and loading layer.

use econlab_core::DataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown dataset '{name}'")]
    UnknownDataset { name: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("loading '{name}' did not finish before the deadline")]
    TimedOut { name: String },

    #[error("could not start a worker for '{name}': {reason}")]
    Worker { name: String, reason: String },

    #[error("{} of {total} datasets failed to load: {}", failed.len(), failed.join(", "))]
    BatchFailed { failed: Vec<String>, total: usize },

    #[error("invalid reconciler configuration: {0}")]
    Config(String),
}

impl From<LoadError> for DataError {
    /// Lifts a load failure back into the core taxonomy, e.g. when an
    /// auxiliary series for `convert` cannot be loaded.
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Data(e) => e,
            LoadError::UnknownDataset { name } => DataError::UnknownDataset { name },
            other => DataError::CacheError(other.to_string()),
        }
    }
}
