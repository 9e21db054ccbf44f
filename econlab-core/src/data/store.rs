//! Cache storage contract, per-name write serialization and the in-memory store.

use crate::dataset::Dataset;
use crate::error::DataError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// A stored dataset and the time it was written.
#[derive(Debug, Clone)]
pub struct CachedDataset {
    pub dataset: Dataset,
    pub written_at: DateTime<Utc>,
}

/// Backing store for cached datasets.
///
/// `read` returns `Ok(None)` when nothing is stored under `name` and
/// [`DataError::CacheCorruption`] when something is stored but unreadable.
/// Writes to the same name must be serialized by the implementation.
pub trait CacheStore: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<CachedDataset>, DataError>;

    /// Persist `dataset` under `name`, returning the recorded write time.
    fn write(&self, name: &str, dataset: &Dataset) -> Result<DateTime<Utc>, DataError>;

    /// Short description for logs and status output.
    fn location(&self) -> String;
}

/// Keyed mutexes: one lock per dataset name, created on demand.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `name`. Hold the guard of `lock.lock()` for the critical section.
    pub fn handle(&self, name: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string()).or_default().clone()
    }
}

/// Acquire a unit mutex, ignoring poisoning (the guarded state is `()`).
pub fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

/// Process-local store, used by tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CachedDataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit write time.
    pub fn insert(&self, name: &str, dataset: Dataset, written_at: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(name.to_string(), CachedDataset { dataset, written_at });
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn read(&self, name: &str) -> Result<Option<CachedDataset>, DataError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(name).cloned())
    }

    fn write(&self, name: &str, dataset: &Dataset) -> Result<DateTime<Utc>, DataError> {
        let now = Utc::now();
        self.insert(name, dataset.clone(), now);
        Ok(now)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
