//! Period-on-period changes and differences.

use super::{ChangeOp, ChangePeriod, Transform};
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::MetadataOp;

impl Dataset {
    /// Percent changes (in percent) or differences against the previous
    /// period, the same period a year earlier, or the previous period
    /// compounded to an annual rate.
    ///
    /// Lags are positional: the index is assumed to be regular.
    pub fn chg_diff(&self, operation: ChangeOp, period: ChangePeriod) -> Result<Dataset, DataError> {
        let frequency = self.uniform_frequency("chg_diff")?;
        let metadata = self
            .metadata()
            .derive(self.name(), &MetadataOp::ChangeDiff { operation, period })?;
        // Derivation guarantees a calendar frequency for non-`Last` periods.
        let per_year = frequency.periods_per_year().unwrap_or(1);
        let lag = match period {
            ChangePeriod::YearOverYear => per_year,
            ChangePeriod::Last | ChangePeriod::Annualized => 1,
        };
        if self.len() < lag + 1 {
            return Err(DataError::InsufficientData {
                dataset: self.name().to_string(),
                operation: format!("chg_diff({operation}, {period})"),
                required: lag + 1,
                available: self.len(),
            });
        }

        let values: Vec<Vec<Option<f64>>> = self
            .values()
            .iter()
            .map(|column| {
                (0..column.len())
                    .map(|t| {
                        let current = column[t]?;
                        let previous = column[t.checked_sub(lag)?]?;
                        Some(match (operation, period) {
                            (ChangeOp::Diff, _) => current - previous,
                            (ChangeOp::PctChange, ChangePeriod::Annualized) => {
                                let rate = current / previous;
                                (rate.powi(per_year as i32) - 1.0) * 100.0
                            }
                            (ChangeOp::PctChange, _) => (current / previous - 1.0) * 100.0,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        self.derived(
            self.index().to_vec(),
            self.keys().to_vec(),
            values,
            metadata,
            Transform::ChgDiff { operation, period },
        )
    }
}
