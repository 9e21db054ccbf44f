//! Cache/update reconciliation for one named dataset.
//!
//! Given the load flags and the staleness window, a load walks these states:
//! 1. `skip_cache` → fetch and return (`Downloaded`); the store is never touched
//! 2. Nothing cached (or the entry is corrupt) → `NoCache` → fetch, write (`Downloaded`)
//! 3. Cached and younger than the window → `CacheFresh`
//! 4. Cached, stale and `skip_update` → `CacheStale`, returned as if fresh
//! 5. Otherwise fetch (`Downloaded`), merge under the revision policy, then
//!    either write (`Merged`) or keep the cache (`Rejected`)
//!
//! A failed fetch with a cache present degrades to the cached dataset with a
//! warning; without a cache the failure is returned.

use crate::config::ReconcileConfig;
use crate::error::LoadError;
use crate::merge::merge_revisions;
use chrono::{DateTime, Utc};
use econlab_core::data::registry::staleness_window;
use econlab_core::data::store::{acquire, NameLocks};
use econlab_core::transform::{AuxiliarySource, ConvertFlavor};
use econlab_core::{
    apply_chain, CacheStore, ClassicalDecomposer, DataError, Dataset, DatasetConfig, Decomposer,
    Registry, Retriever, TransformContext,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Caller switches for one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadFlags {
    /// Fetch without reading or writing the cache.
    pub skip_cache: bool,
    /// Return stale cache without fetching.
    pub skip_update: bool,
    /// Write the merge result even if it fails the similarity guard.
    pub force_overwrite: bool,
}

/// Reconciler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheState {
    NoCache,
    CacheFresh,
    CacheStale,
    Downloaded,
    Merged,
    Rejected,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheState::NoCache => "NO_CACHE",
            CacheState::CacheFresh => "CACHE_FRESH",
            CacheState::CacheStale => "CACHE_STALE",
            CacheState::Downloaded => "DOWNLOADED",
            CacheState::Merged => "MERGED",
            CacheState::Rejected => "REJECTED",
        })
    }
}

/// Result of one load.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub dataset: Dataset,
    /// Final state.
    pub state: CacheState,
    /// Every state visited, in order.
    pub transitions: Vec<CacheState>,
    /// Non-fatal problems: corrupt cache, degraded fetch, rejected update.
    pub warnings: Vec<String>,
    /// Whether the store was written.
    pub written: bool,
}

impl LoadOutcome {
    pub fn rejected(&self) -> bool {
        self.state == CacheState::Rejected
    }
}

/// What the store holds for one name.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub name: String,
    pub cached: bool,
    pub rows: Option<usize>,
    pub start: Option<chrono::NaiveDate>,
    pub end: Option<chrono::NaiveDate>,
    pub written_at: Option<DateTime<Utc>>,
    pub stale: Option<bool>,
    pub error: Option<String>,
}

struct Trace {
    transitions: Vec<CacheState>,
    warnings: Vec<String>,
}

impl Trace {
    fn new() -> Self {
        Self {
            transitions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, state: CacheState) {
        self.transitions.push(state);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn finish(self, dataset: Dataset, written: bool) -> LoadOutcome {
        let state = self.transitions.last().copied().unwrap_or(CacheState::Downloaded);
        LoadOutcome {
            dataset,
            state,
            transitions: self.transitions,
            warnings: self.warnings,
            written,
        }
    }
}

/// Loads datasets through the cache, refreshing from the retriever.
///
/// Loads of the same name are serialized; different names proceed
/// independently.
pub struct Reconciler {
    registry: Arc<Registry>,
    store: Arc<dyn CacheStore>,
    retriever: Arc<dyn Retriever>,
    decomposer: Arc<dyn Decomposer>,
    config: ReconcileConfig,
    locks: NameLocks,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn CacheStore>,
        retriever: Arc<dyn Retriever>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            registry,
            store,
            retriever,
            decomposer: Arc::new(ClassicalDecomposer),
            config,
            locks: NameLocks::new(),
        }
    }

    /// Replace the decomposer used by [`Reconciler::load_transformed`].
    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    fn staleness(&self, config: &DatasetConfig) -> chrono::Duration {
        match self.config.staleness_hours {
            Some(hours) => staleness_window(hours),
            None => config.staleness(),
        }
    }

    /// Load `name`, consulting and refreshing the cache according to `flags`.
    pub fn load(&self, name: &str, flags: LoadFlags) -> Result<LoadOutcome, LoadError> {
        let config = self.registry.get(name).ok_or_else(|| LoadError::UnknownDataset {
            name: name.to_string(),
        })?;
        let lock = self.locks.handle(name);
        let _guard = acquire(&lock);
        let mut trace = Trace::new();

        if flags.skip_cache {
            let dataset = self.download(config)?;
            trace.enter(CacheState::Downloaded);
            return Ok(trace.finish(dataset, false));
        }

        let cached = match self.store.read(name) {
            Ok(cached) => cached,
            Err(e) if e.is_cache_corruption() => {
                tracing::warn!(dataset = name, error = %e, "ignoring unreadable cache entry");
                trace.warn(e.to_string());
                None
            }
            Err(e) => return Err(e.into()),
        };

        let Some(cached) = cached else {
            trace.enter(CacheState::NoCache);
            let dataset = self.download(config)?;
            trace.enter(CacheState::Downloaded);
            self.store.write(name, &dataset)?;
            tracing::info!(dataset = name, rows = dataset.len(), store = %self.store.location(), "cached new dataset");
            return Ok(trace.finish(dataset, true));
        };

        let age = Utc::now() - cached.written_at;
        if age < self.staleness(config) {
            trace.enter(CacheState::CacheFresh);
            return Ok(trace.finish(cached.dataset, false));
        }
        trace.enter(CacheState::CacheStale);
        if flags.skip_update {
            return Ok(trace.finish(cached.dataset, false));
        }

        let fresh = match self.download(config) {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(dataset = name, error = %e, "update failed, returning cached data");
                trace.warn(format!("update failed, returning cached data: {e}"));
                return Ok(trace.finish(cached.dataset, false));
            }
        };
        trace.enter(CacheState::Downloaded);

        let merged = merge_revisions(&cached.dataset, &fresh, config.revise_rows, config.frequency)?;
        if flags.force_overwrite || merged.is_similar(&cached.dataset, &self.config.similarity) {
            self.store.write(name, &merged)?;
            trace.enter(CacheState::Merged);
            tracing::info!(
                dataset = name,
                cached_rows = cached.dataset.len(),
                merged_rows = merged.len(),
                forced = flags.force_overwrite,
                "cache updated"
            );
            return Ok(trace.finish(merged, true));
        }

        tracing::warn!(
            dataset = name,
            cached_rows = cached.dataset.len(),
            merged_rows = merged.len(),
            "update rejected: fetched data differs too much from the cache"
        );
        trace.enter(CacheState::Rejected);
        trace.warn(format!(
            "update of '{name}' rejected: fetched data is not similar to the cached version"
        ));
        Ok(trace.finish(cached.dataset, false))
    }

    /// Load `name` and apply its registry transform chain.
    pub fn load_transformed(&self, name: &str, flags: LoadFlags) -> Result<LoadOutcome, LoadError> {
        let mut outcome = self.load(name, flags)?;
        let steps = self
            .registry
            .get(name)
            .map(|c| c.transforms.clone())
            .unwrap_or_default();
        if steps.is_empty() {
            return Ok(outcome);
        }
        let ctx = TransformContext::new(self.decomposer.as_ref()).with_auxiliary(self);
        outcome.dataset = apply_chain(&outcome.dataset, &steps, &ctx)?;
        Ok(outcome)
    }

    /// What the store holds for each of `names`, or every registered name.
    pub fn cache_status(&self, names: &[String]) -> Vec<CacheStatus> {
        let names: Vec<String> = if names.is_empty() {
            self.registry.names().map(str::to_string).collect()
        } else {
            names.to_vec()
        };
        names
            .into_iter()
            .map(|name| {
                let window = self.registry.get(&name).map(|c| self.staleness(c));
                match self.store.read(&name) {
                    Ok(Some(cached)) => CacheStatus {
                        rows: Some(cached.dataset.len()),
                        start: cached.dataset.first_period(),
                        end: cached.dataset.last_period(),
                        written_at: Some(cached.written_at),
                        stale: window.map(|w| Utc::now() - cached.written_at >= w),
                        cached: true,
                        error: None,
                        name,
                    },
                    Ok(None) => CacheStatus::empty(name, None),
                    Err(e) => CacheStatus::empty(name, Some(e.to_string())),
                }
            })
            .collect()
    }

    /// Fetch and normalize, retrying transient retrieval failures.
    fn download(&self, config: &DatasetConfig) -> Result<Dataset, LoadError> {
        let name = config.name.as_str();
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.retriever.fetch(name) {
                Ok(raw) => {
                    let dataset = Dataset::from_raw(config, &raw)?;
                    tracing::debug!(dataset = name, rows = dataset.len(), attempt, "fetched");
                    return Ok(dataset);
                }
                Err(e) if e.transient && attempt < retry.attempts => {
                    let delay = retry.delay(attempt);
                    tracing::warn!(
                        dataset = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient retrieval failure, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(source) => {
                    return Err(DataError::Retrieval {
                        name: name.to_string(),
                        source,
                    }
                    .into())
                }
            }
        }
    }
}

impl CacheStatus {
    fn empty(name: String, error: Option<String>) -> Self {
        Self {
            name,
            cached: false,
            rows: None,
            start: None,
            end: None,
            written_at: None,
            stale: None,
            error,
        }
    }
}

impl AuxiliarySource for Reconciler {
    fn auxiliary(&self, flavor: ConvertFlavor) -> Result<Dataset, DataError> {
        let name = self
            .registry
            .auxiliary_for(flavor)
            .ok_or_else(|| DataError::RegistryError(format!("no auxiliary dataset registered for {flavor}")))?;
        Ok(self.load(name, LoadFlags::default())?.dataset)
    }
}
