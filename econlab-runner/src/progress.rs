//! Progress callbacks for batch loads.

use crate::error::LoadError;
use crate::reconcile::LoadOutcome;

/// Progress reporter for [`crate::load_parallel`].
///
/// Callbacks run on the calling thread, in completion order.
pub trait LoadProgress: Send + Sync {
    /// A load was dispatched.
    fn on_start(&self, name: &str, index: usize, total: usize);

    /// A load finished, failed or timed out.
    fn on_complete(&self, name: &str, index: usize, total: usize, result: Result<&LoadOutcome, &LoadError>);

    /// Every load has been accounted for.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports progress through `tracing`.
pub struct TracingProgress;

impl LoadProgress for TracingProgress {
    fn on_start(&self, name: &str, index: usize, total: usize) {
        tracing::debug!(dataset = name, "[{}/{}] loading", index + 1, total);
    }

    fn on_complete(&self, name: &str, index: usize, total: usize, result: Result<&LoadOutcome, &LoadError>) {
        match result {
            Ok(outcome) => tracing::info!(
                dataset = name,
                state = %outcome.state,
                rows = outcome.dataset.len(),
                "[{}/{}] loaded",
                index + 1,
                total
            ),
            Err(e) => tracing::warn!(dataset = name, error = %e, "[{}/{}] failed", index + 1, total),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "batch complete");
    }
}
