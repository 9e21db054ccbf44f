//! econlab runner: cache/update reconciliation and parallel loading.
//!
//! This crate builds on `econlab-core` to provide:
//! - The reconciler state machine (fresh / stale / merge / reject)
//! - Revision-policy merging of fresh fetches into the cache
//! - Parallel batch loads with ordered results and an optional deadline
//! - Retry, staleness and similarity settings, and cache directory resolution

pub mod config;
pub mod error;
pub mod loader;
pub mod merge;
pub mod progress;
pub mod reconcile;

pub use config::{default_cache_dir, resolve_cache_dir, ReconcileConfig, RetryPolicy, CACHE_DIR_ENV};
pub use error::LoadError;
pub use loader::{load_parallel, BatchLoad, ExecutionStrategy, ParallelOptions};
pub use merge::merge_revisions;
pub use progress::{LoadProgress, TracingProgress};
pub use reconcile::{CacheState, CacheStatus, LoadFlags, LoadOutcome, Reconciler};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn reconciler_is_send_sync() {
        assert_send::<Reconciler>();
        assert_sync::<Reconciler>();
    }

    #[test]
    fn outcomes_cross_threads() {
        assert_send::<LoadOutcome>();
        assert_send::<LoadError>();
        assert_send::<BatchLoad>();
    }

    #[test]
    fn config_is_send_sync() {
        assert_send::<ReconcileConfig>();
        assert_sync::<ReconcileConfig>();
        assert_send::<ParallelOptions>();
        assert_sync::<ParallelOptions>();
    }
}
