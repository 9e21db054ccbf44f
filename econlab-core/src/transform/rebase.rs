//! Rescaling to a base window.

use super::Transform;
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::MetadataOp;
use chrono::NaiveDate;

impl Dataset {
    /// Divide each column by its mean over `[start, end]` and multiply by `base`.
    ///
    /// Without `end`, the base window is the single period nearest to `start`.
    pub fn rebase(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        base: f64,
    ) -> Result<Dataset, DataError> {
        let metadata = self.metadata().derive(self.name(), &MetadataOp::Rebase)?;
        let window_label = match end {
            Some(end) => format!("{start}..={end}"),
            None => format!("nearest to {start}"),
        };
        let invalid = |reason: String| DataError::InvalidWindow {
            dataset: self.name().to_string(),
            operation: "rebase".to_string(),
            window: window_label.clone(),
            reason,
        };

        let rows: Vec<usize> = match end {
            Some(end) if end < start => return Err(invalid("end precedes start".into())),
            Some(end) => self
                .index()
                .iter()
                .enumerate()
                .filter(|(_, d)| **d >= start && **d <= end)
                .map(|(i, _)| i)
                .collect(),
            None => self
                .index()
                .iter()
                .enumerate()
                .min_by_key(|(_, d)| (**d - start).num_days().abs())
                .map(|(i, _)| vec![i])
                .unwrap_or_default(),
        };
        if rows.is_empty() {
            return Err(invalid("window contains no observations".into()));
        }

        let mut values: Vec<Vec<Option<f64>>> = Vec::with_capacity(self.width());
        for (key, column) in self.columns() {
            let present: Vec<f64> = rows.iter().filter_map(|&i| column[i]).collect();
            if present.is_empty() {
                return Err(invalid(format!("column '{key}' has no values in the window")));
            }
            let mean = present.iter().sum::<f64>() / present.len() as f64;
            if mean == 0.0 {
                return Err(invalid(format!("column '{key}' averages zero in the window")));
            }
            values.push(column.iter().map(|v| v.map(|x| x / mean * base)).collect());
        }

        self.derived(
            self.index().to_vec(),
            self.keys().to_vec(),
            values,
            metadata,
            Transform::Rebase { start, end, base },
        )
    }
}
