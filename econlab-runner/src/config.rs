//! Reconciler settings and cache location.

use crate::error::LoadError;
use econlab_core::SimilarityConfig;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the cache directory.
pub const CACHE_DIR_ENV: &str = "ECONLAB_DATA_DIR";

/// Retries for transient retrieval failures, with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls, including the first.
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay before call number `attempt + 1` (1-based `attempt`).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Settings for [`crate::Reconciler`].
///
/// ```toml
/// staleness_hours = 12
///
/// [similarity]
/// tolerance = 0.05
///
/// [retry]
/// attempts = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub similarity: SimilarityConfig,
    pub retry: RetryPolicy,
    /// Staleness window for every dataset; `None` uses each dataset's own.
    pub staleness_hours: Option<u64>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityConfig::default(),
            retry: RetryPolicy::default(),
            staleness_hours: None,
        }
    }
}

impl ReconcileConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, LoadError> {
        let config: Self = toml::from_str(text).map_err(|e| LoadError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), LoadError> {
        let s = &self.similarity;
        if !(s.tolerance >= 0.0 && s.tolerance.is_finite()) {
            return Err(LoadError::Config(format!(
                "similarity.tolerance must be a non-negative number, got {}",
                s.tolerance
            )));
        }
        if !(0.0..=1.0).contains(&s.row_drop_threshold) {
            return Err(LoadError::Config(format!(
                "similarity.row_drop_threshold must be within [0, 1], got {}",
                s.row_drop_threshold
            )));
        }
        if !(s.settled_share > 0.0 && s.settled_share <= 1.0) {
            return Err(LoadError::Config(format!(
                "similarity.settled_share must be within (0, 1], got {}",
                s.settled_share
            )));
        }
        if self.retry.attempts == 0 {
            return Err(LoadError::Config("retry.attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Cache directory from an explicit value, else the platform cache
/// directory, else `./econlab-data`.
pub fn resolve_cache_dir(explicit: Option<OsString>) -> PathBuf {
    match explicit.filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::cache_dir()
            .map(|d| d.join("econlab"))
            .unwrap_or_else(|| PathBuf::from("econlab-data")),
    }
}

/// [`resolve_cache_dir`] fed from `ECONLAB_DATA_DIR`.
pub fn default_cache_dir() -> PathBuf {
    resolve_cache_dir(std::env::var_os(CACHE_DIR_ENV))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ReconcileConfig::default();
        assert_eq!(config.similarity.tolerance, 0.10);
        assert_eq!(config.similarity.row_drop_threshold, 0.50);
        assert_eq!(config.similarity.settled_share, 0.90);
        assert_eq!(config.retry.attempts, 4);
        assert_eq!(config.retry.delay(2), Duration::from_millis(500));
        assert!(config.staleness_hours.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ReconcileConfig::from_toml_str(
            r#"
            staleness_hours = 6
            [similarity]
            tolerance = 0.02
            "#,
        )
        .unwrap();
        assert_eq!(config.staleness_hours, Some(6));
        assert_eq!(config.similarity.tolerance, 0.02);
        assert_eq!(config.similarity.row_drop_threshold, 0.50);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(ReconcileConfig::from_toml_str("[similarity]\nrow_drop_threshold = 1.5").is_err());
        assert!(ReconcileConfig::from_toml_str("[retry]\nattempts = 0").is_err());
        assert!(ReconcileConfig::from_toml_str("[similarity]\nsettled_share = 0.0").is_err());
    }

    #[test]
    fn explicit_cache_dir_wins() {
        assert_eq!(
            resolve_cache_dir(Some(OsString::from("/tmp/econ"))),
            PathBuf::from("/tmp/econ")
        );
        let fallback = resolve_cache_dir(Some(OsString::new()));
        assert!(fallback.ends_with("econlab") || fallback.ends_with("econlab-data"));
        assert_eq!(resolve_cache_dir(None), fallback);
    }
}
