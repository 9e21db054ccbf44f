//! The dataset entity: a named, time-indexed table of series plus metadata.
//!
//! Invariants enforced by [`Dataset::new`]:
//! - the period index is strictly increasing (no duplicates)
//! - every column has one value per period; non-finite values become missing
//! - column keys match the metadata keys exactly, in order

use crate::data::registry::DatasetConfig;
use crate::data::retriever::RawTable;
use crate::error::DataError;
use crate::metadata::DatasetMetadata;
use crate::transform::Transform;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Name of the period column in the columnar form.
pub const PERIOD_COLUMN: &str = "period";

/// A named, tagged time series table.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    index: Vec<NaiveDate>,
    keys: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
    metadata: DatasetMetadata,
    history: Vec<Transform>,
}

/// Thresholds for [`Dataset::is_similar`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Maximum relative difference of per-column mean and standard deviation.
    pub tolerance: f64,
    /// Maximum fraction of cached rows the candidate may lose.
    pub row_drop_threshold: f64,
    /// Leading share of the cached periods that is compared. The trailing
    /// remainder is still open to revision.
    pub settled_share: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.10,
            row_drop_threshold: 0.50,
            settled_share: 0.90,
        }
    }
}

impl Dataset {
    /// Build a dataset, checking the index, column lengths and metadata.
    pub fn new(
        name: impl Into<String>,
        index: Vec<NaiveDate>,
        columns: Vec<(String, Vec<Option<f64>>)>,
        metadata: DatasetMetadata,
    ) -> Result<Self, DataError> {
        let name = name.into();
        let (keys, values): (Vec<String>, Vec<Vec<Option<f64>>>) = columns.into_iter().unzip();
        Self::from_parts(name, index, keys, values, metadata, Vec::new())
    }

    fn from_parts(
        name: String,
        index: Vec<NaiveDate>,
        keys: Vec<String>,
        mut values: Vec<Vec<Option<f64>>>,
        metadata: DatasetMetadata,
        history: Vec<Transform>,
    ) -> Result<Self, DataError> {
        if let Some(pair) = index.windows(2).find(|w| w[0] >= w[1]) {
            return Err(DataError::MalformedData {
                dataset: name,
                reason: format!(
                    "period index is not strictly increasing at {} -> {}",
                    pair[0], pair[1]
                ),
            });
        }
        for (key, column) in keys.iter().zip(values.iter_mut()) {
            if column.len() != index.len() {
                return Err(DataError::MalformedData {
                    dataset: name,
                    reason: format!(
                        "column '{key}' has {} values for {} periods",
                        column.len(),
                        index.len()
                    ),
                });
            }
            for v in column.iter_mut() {
                if matches!(v, Some(x) if !x.is_finite()) {
                    *v = None;
                }
            }
        }
        metadata.validate(&keys)?;
        Ok(Self {
            name,
            index,
            keys,
            values,
            metadata,
            history,
        })
    }

    /// New dataset derived from `self`: same name, history extended by `step`.
    pub(crate) fn derived(
        &self,
        index: Vec<NaiveDate>,
        keys: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
        metadata: DatasetMetadata,
        step: Transform,
    ) -> Result<Dataset, DataError> {
        let mut history = self.history.clone();
        history.push(step);
        Self::from_parts(self.name.clone(), index, keys, values, metadata, history)
    }

    /// Replace the transformation history (used when restoring from storage).
    pub fn with_history(mut self, history: Vec<Transform>) -> Self {
        self.history = history;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// Steps applied since the dataset was built from raw or stored data.
    pub fn history(&self) -> &[Transform] {
        &self.history
    }

    /// Number of periods.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn width(&self) -> usize {
        self.keys.len()
    }

    pub fn column(&self, key: &str) -> Option<&[Option<f64>]> {
        let pos = self.keys.iter().position(|k| k == key)?;
        Some(&self.values[pos])
    }

    /// `(key, values)` pairs in column order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Vec::as_slice))
    }

    pub fn first_period(&self) -> Option<NaiveDate> {
        self.index.first().copied()
    }

    pub fn last_period(&self) -> Option<NaiveDate> {
        self.index.last().copied()
    }

    pub(crate) fn values(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }

    /// Restrict to `names`, in the order given.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Dataset, DataError> {
        let mut keys = Vec::with_capacity(names.len());
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let column = self.column(name).ok_or_else(|| DataError::ColumnNotFound {
                dataset: self.name.clone(),
                column: name.to_string(),
            })?;
            keys.push(name.to_string());
            values.push(column.to_vec());
        }
        let metadata = self.metadata.subset(&keys);
        self.derived(
            self.index.clone(),
            keys.clone(),
            values,
            metadata,
            Transform::Select { columns: keys },
        )
    }

    /// Rows within the closed interval `[start, end]`; open bounds when `None`.
    pub fn filter(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Dataset {
        let keep: Vec<usize> = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, d)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
            .map(|(i, _)| i)
            .collect();
        let mut out = self.clone();
        out.index = keep.iter().map(|&i| self.index[i]).collect();
        out.values = self
            .values
            .iter()
            .map(|col| keep.iter().map(|&i| col[i]).collect())
            .collect();
        out.history.push(Transform::Filter { start, end });
        out
    }

    /// Identical name, index, values and metadata. History is not compared.
    pub fn equals(&self, other: &Dataset) -> bool {
        self.name == other.name
            && self.index == other.index
            && self.keys == other.keys
            && self.values == other.values
            && self.metadata == other.metadata
    }

    /// Whether `self` is a plausible update of `cached`.
    ///
    /// Requires the same columns and metadata and a row count no smaller
    /// than `(1 - row_drop_threshold)` of the cached rows. Only the settled
    /// periods are compared: the leading `settled_share` of the cached
    /// index. Over those, per column, the non-missing counts must match and
    /// the mean and standard deviation must agree within `tolerance`,
    /// scaled by the larger of the cached absolute mean and cached standard
    /// deviation.
    pub fn is_similar(&self, cached: &Dataset, config: &SimilarityConfig) -> bool {
        if self.keys != cached.keys || self.metadata != cached.metadata {
            return false;
        }
        let min_rows = (1.0 - config.row_drop_threshold) * cached.len() as f64;
        if (self.len() as f64) < min_rows {
            return false;
        }
        let settled = ((cached.len() as f64) * config.settled_share).floor() as usize;
        let settled = settled.min(cached.len());
        let periods = &cached.index[..settled];
        for (pos, cached_col) in cached.values.iter().enumerate() {
            let candidate: Vec<Option<f64>> = periods
                .iter()
                .map(|d| {
                    self.index
                        .binary_search(d)
                        .ok()
                        .and_then(|i| self.values[pos][i])
                })
                .collect();
            let (n_new, mean_new, std_new) = moments(&candidate);
            let (n_old, mean_old, std_old) = moments(&cached_col[..settled]);
            if n_new != n_old {
                return false;
            }
            let scale = mean_old.abs().max(std_old);
            if !within(mean_new, mean_old, scale, config.tolerance)
                || !within(std_new, std_old, scale, config.tolerance)
            {
                return false;
            }
        }
        true
    }

    /// Columnar form: a `period` date column followed by one `f64` column per series.
    pub fn to_dataframe(&self) -> Result<DataFrame, DataError> {
        if self.keys.iter().any(|k| k == PERIOD_COLUMN) {
            return Err(DataError::MalformedData {
                dataset: self.name.clone(),
                reason: format!("column key '{PERIOD_COLUMN}' is reserved"),
            });
        }
        let days: Vec<i32> = self.index.iter().map(|d| epoch_days(*d)).collect();
        let mut columns = Vec::with_capacity(self.keys.len() + 1);
        columns.push(
            Column::new(PERIOD_COLUMN.into(), days)
                .cast(&DataType::Date)
                .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        );
        for (key, values) in self.keys.iter().zip(&self.values) {
            columns.push(Column::new(key.as_str().into(), values.clone()));
        }
        DataFrame::new(columns)
            .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
    }

    /// Rebuild from the columnar form; columns are read in metadata key order.
    pub fn from_dataframe(
        name: impl Into<String>,
        df: &DataFrame,
        metadata: DatasetMetadata,
    ) -> Result<Dataset, DataError> {
        let name = name.into();
        let malformed = |reason: String| DataError::MalformedData {
            dataset: name.clone(),
            reason,
        };

        let period = df
            .column(PERIOD_COLUMN)
            .map_err(|e| malformed(format!("missing '{PERIOD_COLUMN}' column: {e}")))?;
        let period_ca = period
            .date()
            .map_err(|e| malformed(format!("period column type: {e}")))?;
        let mut index = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let days = period_ca
                .get(i)
                .ok_or_else(|| malformed(format!("null period at row {i}")))?;
            index.push(
                from_epoch_days(days)
                    .ok_or_else(|| malformed(format!("period out of range at row {i}")))?,
            );
        }

        let mut columns = Vec::with_capacity(metadata.len());
        for key in metadata.keys() {
            let column = df
                .column(key)
                .map_err(|e| malformed(format!("missing column '{key}': {e}")))?
                .cast(&DataType::Float64)
                .map_err(|e| malformed(format!("column '{key}' is not numeric: {e}")))?;
            let ca = column
                .f64()
                .map_err(|e| malformed(format!("column '{key}' type: {e}")))?;
            let values: Vec<Option<f64>> = (0..df.height()).map(|i| ca.get(i)).collect();
            columns.push((key.to_string(), values));
        }

        Dataset::new(name, index, columns, metadata)
    }

    /// Build from a retriever's raw table.
    ///
    /// Period labels are normalized to period ends of the configured
    /// frequency. Cells that are blank, `NA`, `..`, `-` or otherwise
    /// unparsable become missing. Rows whose label does not parse are
    /// skipped when they carry no values (notes, separators) and rejected
    /// otherwise. Duplicate periods are rejected.
    pub fn from_raw(config: &DatasetConfig, raw: &RawTable) -> Result<Dataset, DataError> {
        let malformed = |reason: String| DataError::MalformedData {
            dataset: config.name.clone(),
            reason,
        };
        if raw.columns.is_empty() {
            return Err(malformed("raw table has no value columns".into()));
        }
        for column in &raw.columns {
            if column.cells.len() != raw.periods.len() {
                return Err(malformed(format!(
                    "raw column '{}' has {} cells for {} period labels",
                    column.name,
                    column.cells.len(),
                    raw.periods.len()
                )));
            }
        }

        let mut rows: Vec<(NaiveDate, usize)> = Vec::with_capacity(raw.periods.len());
        for (i, label) in raw.periods.iter().enumerate() {
            match config.frequency.parse_period(label) {
                Some(date) => rows.push((date, i)),
                None => {
                    let empty = raw
                        .columns
                        .iter()
                        .all(|c| parse_cell(&c.cells[i]).is_none());
                    if !empty {
                        return Err(malformed(format!(
                            "unparseable period label '{label}' at row {i}"
                        )));
                    }
                }
            }
        }
        rows.sort_by_key(|(date, _)| *date);
        if let Some(pair) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(malformed(format!("duplicate period {}", pair[0].0)));
        }

        let index: Vec<NaiveDate> = rows.iter().map(|(d, _)| *d).collect();
        let mut columns = Vec::with_capacity(raw.columns.len());
        let mut entries = Vec::with_capacity(raw.columns.len());
        for column in &raw.columns {
            let values = rows.iter().map(|(_, i)| parse_cell(&column.cells[*i])).collect();
            columns.push((column.name.clone(), values));
            entries.push((column.name.clone(), config.indicator_metadata(&column.name)));
        }
        tracing::debug!(
            dataset = %config.name,
            rows = index.len(),
            columns = columns.len(),
            "built dataset from raw table"
        );
        Dataset::new(config.name.clone(), index, columns, DatasetMetadata::new(entries))
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

/// Numeric coercion of one raw cell.
pub fn parse_cell(cell: &str) -> Option<f64> {
    let text = cell.trim();
    if matches!(text, "" | "-" | ".." | "..." | "NA" | "N/A" | "n/a" | "na" | "s/d") {
        return None;
    }
    let cleaned: String = text.chars().filter(|c| *c != ',' && *c != ' ').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Count, mean and population standard deviation of the present values.
fn moments(values: &[Option<f64>]) -> (usize, f64, f64) {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let n = present.len();
    if n == 0 {
        return (0, 0.0, 0.0);
    }
    let mean = present.iter().sum::<f64>() / n as f64;
    let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (n, mean, var.sqrt())
}

fn within(candidate: f64, reference: f64, scale: f64, tolerance: f64) -> bool {
    (candidate - reference).abs() <= tolerance * scale + 1e-12
}

/// Days since 1970-01-01, the physical encoding of a polars `Date`.
pub(crate) fn epoch_days(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

pub(crate) fn from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::default().checked_add_signed(chrono::Duration::days(days as i64))
}
