//! Downsampling to a coarser frequency.

use super::{ResampleOp, Transform};
use crate::data::align::aggregate;
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::MetadataOp;
use crate::period::Frequency;
use chrono::NaiveDate;

impl Dataset {
    /// Aggregate each column into `rule` periods with `operation`.
    ///
    /// When both frequencies are calendar frequencies, a bin with fewer present
    /// observations than the frequency ratio yields a missing value. Rows that
    /// end up missing in every column are dropped.
    pub fn resample(&self, rule: Frequency, operation: ResampleOp) -> Result<Dataset, DataError> {
        let source = self.uniform_frequency("resample")?;
        let metadata = self
            .metadata()
            .derive(self.name(), &MetadataOp::Resample { target: rule, operation })?;
        let required = source.bin_ratio(rule).unwrap_or(1);

        // Consecutive rows sharing a period end form one bin (the index is sorted).
        let mut bins: Vec<(NaiveDate, usize, usize)> = Vec::new();
        for (row, date) in self.index().iter().enumerate() {
            let end = rule.period_end(*date);
            match bins.last_mut() {
                Some((last_end, _, stop)) if *last_end == end => *stop = row + 1,
                _ => bins.push((end, row, row + 1)),
            }
        }

        let mut index = Vec::with_capacity(bins.len());
        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(bins.len()); self.width()];
        for (end, start, stop) in bins {
            let row: Vec<Option<f64>> = self
                .values()
                .iter()
                .map(|column| {
                    let obs: Vec<f64> = column[start..stop].iter().flatten().copied().collect();
                    if obs.len() < required {
                        None
                    } else {
                        aggregate(&obs, operation)
                    }
                })
                .collect();
            if row.iter().all(Option::is_none) {
                continue;
            }
            index.push(end);
            for (col, v) in values.iter_mut().zip(row) {
                col.push(v);
            }
        }

        tracing::debug!(
            dataset = self.name(),
            from = %source,
            to = %rule,
            %operation,
            rows_in = self.len(),
            rows_out = index.len(),
            "resampled"
        );
        self.derived(
            index,
            self.keys().to_vec(),
            values,
            metadata,
            Transform::Resample { rule, operation },
        )
    }
}
