//! Parquet cache with a JSON metadata sidecar.
//!
//! Layout: `{cache_dir}/{name}.parquet` and `{cache_dir}/{name}.meta.json`.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Per-name write serialization
//! - Integrity check on read (blake3 hash of the Parquet bytes recorded in the sidecar)
//! - Quarantine for corrupt files ({filename}.quarantined)

use super::store::{acquire, CacheStore, CachedDataset, NameLocks};
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::DatasetMetadata;
use crate::transform::Transform;
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Metadata sidecar for a cached dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub name: String,
    pub written_at: DateTime<Utc>,
    pub rows: usize,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub data_hash: String,
    pub metadata: DatasetMetadata,
    #[serde(default)]
    pub history: Vec<Transform>,
}

/// Filesystem-backed [`CacheStore`].
pub struct ParquetStore {
    cache_dir: PathBuf,
    locks: NameLocks,
}

impl ParquetStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            locks: NameLocks::new(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}.parquet"))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}.meta.json"))
    }

    /// Sidecar for `name`, if present and parseable.
    pub fn get_meta(&self, name: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(name)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Move both files aside and report the corruption.
    fn quarantine(&self, name: &str, reason: String) -> DataError {
        tracing::warn!(dataset = name, %reason, "quarantining corrupt cache entry");
        for path in [self.data_path(name), self.meta_path(name)] {
            if path.exists() {
                let mut target = path.clone().into_os_string();
                target.push(".quarantined");
                let target = PathBuf::from(target);
                if let Err(e) = fs::rename(&path, &target) {
                    tracing::warn!(
                        dataset = name,
                        path = %path.display(),
                        error = %e,
                        "failed to quarantine cache file"
                    );
                }
            }
        }
        DataError::CacheCorruption {
            name: name.to_string(),
            reason,
        }
    }

    fn load(&self, name: &str) -> Result<CachedDataset, String> {
        let meta_text = fs::read_to_string(self.meta_path(name))
            .map_err(|e| format!("unreadable sidecar: {e}"))?;
        let meta: CacheMeta =
            serde_json::from_str(&meta_text).map_err(|e| format!("malformed sidecar: {e}"))?;
        let bytes = fs::read(self.data_path(name)).map_err(|e| format!("unreadable data: {e}"))?;

        let hash = blake3::hash(&bytes).to_hex().to_string();
        if hash != meta.data_hash {
            return Err(format!(
                "content hash mismatch (sidecar {}, file {hash})",
                meta.data_hash
            ));
        }

        let df = ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|e| format!("read parquet: {e}"))?;
        if df.height() != meta.rows {
            return Err(format!("expected {} rows, found {}", meta.rows, df.height()));
        }
        let dataset = Dataset::from_dataframe(name, &df, meta.metadata)
            .map_err(|e| e.to_string())?
            .with_history(meta.history);
        Ok(CachedDataset {
            dataset,
            written_at: meta.written_at,
        })
    }
}

impl CacheStore for ParquetStore {
    fn read(&self, name: &str) -> Result<Option<CachedDataset>, DataError> {
        // Held so a read never sees the data file and sidecar of different writes.
        let lock = self.locks.handle(name);
        let _guard = acquire(&lock);

        let data_exists = self.data_path(name).exists();
        let meta_exists = self.meta_path(name).exists();
        if !data_exists && !meta_exists {
            return Ok(None);
        }
        match self.load(name) {
            Ok(cached) => {
                tracing::debug!(dataset = name, rows = cached.dataset.len(), "cache hit");
                Ok(Some(cached))
            }
            Err(reason) => Err(self.quarantine(name, reason)),
        }
    }

    fn write(&self, name: &str, dataset: &Dataset) -> Result<DateTime<Utc>, DataError> {
        let lock = self.locks.handle(name);
        let _guard = acquire(&lock);

        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut df = dataset.to_dataframe()?;
        let mut bytes = Vec::new();
        ParquetWriter::new(&mut bytes)
            .finish(&mut df)
            .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;

        let written_at = Utc::now();
        let meta = CacheMeta {
            name: name.to_string(),
            written_at,
            rows: dataset.len(),
            start: dataset.first_period(),
            end: dataset.last_period(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            metadata: dataset.metadata().clone(),
            history: dataset.history().to_vec(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        write_atomic(&self.data_path(name), &bytes)?;
        write_atomic(&self.meta_path(name), &meta_json)?;
        tracing::debug!(dataset = name, rows = meta.rows, dir = %self.cache_dir.display(), "cache written");
        Ok(written_at)
    }

    fn location(&self) -> String {
        self.cache_dir.display().to_string()
    }
}

/// Write to `{path}.tmp`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    fs::write(&tmp_path, bytes)
        .map_err(|e| DataError::CacheError(format!("write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::CacheError(format!("atomic rename failed: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SeriesType;
    use crate::period::Frequency;
    use crate::transform::test_support::series;
    use crate::transform::RollingOp;
    use std::sync::Arc;

    fn sample() -> Dataset {
        series("cpi", Frequency::Monthly, SeriesType::Stock, 2023, &[100.0, 100.5, 101.2, 101.9])
    }

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());

        let ds = sample().rolling(Some(2), RollingOp::Mean).unwrap();
        let written_at = store.write("cpi", &ds).unwrap();
        let cached = store.read("cpi").unwrap().unwrap();

        assert_eq!(cached.dataset, ds);
        assert_eq!(cached.dataset.history(), ds.history());
        assert_eq!(cached.written_at, written_at);
        assert_eq!(cached.dataset.column("value").unwrap()[0], None);
    }

    #[test]
    fn read_nonexistent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(store.read("absent").unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store.write("cpi", &sample()).unwrap();

        fs::write(dir.path().join("cpi.parquet"), b"not parquet").unwrap();
        let err = store.read("cpi").unwrap_err();
        assert!(err.is_cache_corruption());
        assert!(dir.path().join("cpi.parquet.quarantined").exists());
        assert!(dir.path().join("cpi.meta.json.quarantined").exists());

        // Quarantined entries read as absent afterwards.
        assert!(store.read("cpi").unwrap().is_none());
    }

    #[test]
    fn missing_sidecar_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store.write("cpi", &sample()).unwrap();
        fs::remove_file(dir.path().join("cpi.meta.json")).unwrap();
        assert!(store.read("cpi").unwrap_err().is_cache_corruption());
    }

    #[test]
    fn sidecar_records_range_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store.write("cpi", &sample()).unwrap();
        let meta = store.get_meta("cpi").unwrap();
        assert_eq!(meta.rows, 4);
        assert_eq!(meta.start, NaiveDate::from_ymd_opt(2023, 1, 31));
        assert_eq!(meta.data_hash.len(), 64);
    }

    #[test]
    fn concurrent_writes_to_one_name_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ParquetStore::new(dir.path()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let values: Vec<f64> = (0..6).map(|j| (i * 10 + j) as f64).collect();
                    let ds = series("cpi", Frequency::Monthly, SeriesType::Stock, 2023, &values);
                    store.write("cpi", &ds).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let cached = store.read("cpi").unwrap().unwrap();
        assert_eq!(cached.dataset.len(), 6);
    }

    #[test]
    fn reads_during_rewrites_never_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ParquetStore::new(dir.path()));
        store.write("cpi", &sample()).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..40 {
                    let values: Vec<f64> = (0..5).map(|j| (i * 10 + j) as f64).collect();
                    let ds = series("cpi", Frequency::Monthly, SeriesType::Stock, 2023, &values);
                    store.write("cpi", &ds).unwrap();
                }
            })
        };
        for _ in 0..200 {
            let cached = store.read("cpi").unwrap().unwrap();
            assert!(cached.dataset.len() == 4 || cached.dataset.len() == 5);
        }
        writer.join().unwrap();

        assert!(!dir.path().join("cpi.parquet.quarantined").exists());
        assert_eq!(store.read("cpi").unwrap().unwrap().dataset.len(), 5);
    }
}
