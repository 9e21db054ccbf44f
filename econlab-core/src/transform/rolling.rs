//! Rolling-window aggregation.
//!
//! Lookback: window - 1 (first defined value at row window-1). A window
//! containing a missing value yields a missing value.

use super::{RollingOp, Transform};
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::MetadataOp;

/// Rolling `op` over `values`; the first `window - 1` rows are missing.
pub(crate) fn rolling_window(values: &[Option<f64>], window: usize, op: RollingOp) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return result;
    }
    for end in window..=values.len() {
        let slice = &values[end - window..end];
        let sum = slice.iter().try_fold(0.0, |acc, v| v.map(|v| acc + v));
        result[end - 1] = sum.map(|s| match op {
            RollingOp::Sum => s,
            RollingOp::Mean => s / window as f64,
        });
    }
    result
}

impl Dataset {
    /// Rolling mean or sum. Without a window, uses the periods per year of
    /// the dataset frequency. Row count is preserved.
    pub fn rolling(&self, window: Option<usize>, operation: RollingOp) -> Result<Dataset, DataError> {
        let frequency = self.uniform_frequency("rolling")?;
        let window = match window {
            Some(w) => w,
            None => frequency.periods_per_year().ok_or_else(|| DataError::InvalidWindow {
                dataset: self.name().to_string(),
                operation: "rolling".to_string(),
                window: "default".to_string(),
                reason: format!("no default window for {frequency} data"),
            })?,
        };
        if window == 0 {
            return Err(DataError::InvalidWindow {
                dataset: self.name().to_string(),
                operation: "rolling".to_string(),
                window: "0 periods".to_string(),
                reason: "window must be at least 1".to_string(),
            });
        }
        let metadata = self
            .metadata()
            .derive(self.name(), &MetadataOp::Rolling { window, operation })?;

        let values = self
            .values()
            .iter()
            .map(|column| rolling_window(column, window, operation))
            .collect();
        self.derived(
            self.index().to_vec(),
            self.keys().to_vec(),
            values,
            metadata,
            Transform::Rolling {
                window: Some(window),
                operation,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SeriesType;
    use crate::period::Frequency;
    use crate::transform::test_support::series;

    #[test]
    fn rolling_mean_lookback_is_missing() {
        let ds = series("cpi", Frequency::Monthly, SeriesType::Stock, 2023, &[1.0, 2.0, 3.0, 4.0]);
        let out = ds.rolling(Some(3), RollingOp::Mean).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.column("value").unwrap(), &[None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn window_of_one_is_identity() {
        let ds = series("cpi", Frequency::Monthly, SeriesType::Stock, 2023, &[1.5, -2.25, 3.0]);
        let out = ds.rolling(Some(1), RollingOp::Mean).unwrap();
        assert_eq!(out, ds);
    }

    #[test]
    fn default_window_sums_a_year_of_flows() {
        let ds = series("exports", Frequency::Monthly, SeriesType::Flow, 2023, &[1.0; 13]);
        let out = ds.rolling(None, RollingOp::Sum).unwrap();
        let col = out.column("value").unwrap();
        assert!(col[..11].iter().all(Option::is_none));
        assert_eq!(col[11], Some(12.0));
        assert_eq!(out.metadata().get("value").unwrap().cumulative_periods, 12);
    }

    #[test]
    fn zero_window_and_stock_sum_are_rejected() {
        let ds = series("reserves", Frequency::Monthly, SeriesType::Stock, 2023, &[1.0, 2.0]);
        assert!(matches!(
            ds.rolling(Some(0), RollingOp::Mean),
            Err(DataError::InvalidWindow { .. })
        ));
        assert!(matches!(
            ds.rolling(Some(2), RollingOp::Sum),
            Err(DataError::IncompatibleTransform { .. })
        ));
    }

    #[test]
    fn missing_value_poisons_its_windows() {
        let out = rolling_window(&[Some(1.0), None, Some(3.0), Some(4.0)], 2, RollingOp::Sum);
        assert_eq!(out, vec![None, None, None, Some(7.0)]);
    }
}
