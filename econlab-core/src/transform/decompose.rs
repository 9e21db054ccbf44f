//! Seasonal decomposition.
//!
//! The numerical routine sits behind [`Decomposer`]; this module owns the
//! length check, missing-value handling, the single fallback retry and the
//! metadata update. [`ClassicalDecomposer`] is the built-in moving-average
//! implementation; X13 and loess are supplied by other implementations.

use super::{Component, DecomposeMethod, Transform};
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::MetadataOp;

/// Trend and seasonally adjusted series, aligned with the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub trend: Vec<Option<f64>>,
    pub seasonally_adjusted: Vec<Option<f64>>,
}

impl Components {
    fn pick(&self, component: Component) -> &[Option<f64>] {
        match component {
            Component::Trend => &self.trend,
            Component::SeasonallyAdjusted => &self.seasonally_adjusted,
        }
    }
}

/// A seasonal decomposition routine over a gap-free series.
pub trait Decomposer: Send + Sync {
    fn decompose_raw(
        &self,
        series: &[f64],
        periods_per_year: usize,
        method: DecomposeMethod,
    ) -> Result<Components, String>;
}

/// Classical additive decomposition with a centered moving-average trend.
///
/// Only handles [`DecomposeMethod::MovingAverage`]; the trend is missing for
/// the first and last half-year of the series.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicalDecomposer;

impl Decomposer for ClassicalDecomposer {
    fn decompose_raw(
        &self,
        series: &[f64],
        periods_per_year: usize,
        method: DecomposeMethod,
    ) -> Result<Components, String> {
        if method != DecomposeMethod::MovingAverage {
            return Err(format!("method {method} is not available"));
        }
        let p = periods_per_year;
        let n = series.len();
        if p < 2 || n < 2 * p {
            return Err(format!("{n} observations cannot be decomposed with period {p}"));
        }

        let half = p / 2;
        let mut trend = vec![None; n];
        for (t, slot) in trend.iter_mut().enumerate().take(n - half).skip(half) {
            let sum: f64 = if p % 2 == 0 {
                0.5 * series[t - half]
                    + series[t - half + 1..t + half].iter().sum::<f64>()
                    + 0.5 * series[t + half]
            } else {
                series[t - half..=t + half].iter().sum()
            };
            *slot = Some(sum / p as f64);
        }

        let mut sums = vec![0.0; p];
        let mut counts = vec![0usize; p];
        for (t, tr) in trend.iter().enumerate() {
            if let Some(tr) = tr {
                sums[t % p] += series[t] - tr;
                counts[t % p] += 1;
            }
        }
        if counts.iter().any(|c| *c == 0) {
            return Err("not every season has a detrended observation".to_string());
        }
        let mut seasonal: Vec<f64> = sums.iter().zip(&counts).map(|(s, c)| s / *c as f64).collect();
        let offset = seasonal.iter().sum::<f64>() / p as f64;
        seasonal.iter_mut().for_each(|s| *s -= offset);

        let seasonally_adjusted = series
            .iter()
            .enumerate()
            .map(|(t, x)| Some(x - seasonal[t % p]))
            .collect();
        Ok(Components {
            trend,
            seasonally_adjusted,
        })
    }
}

/// Both failure messages when the primary and fallback methods fail.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposeFailure {
    pub primary: String,
    pub fallback: String,
}

/// Run `method`, retrying once with `fallback` when it fails.
///
/// Returns the components and the method that produced them.
pub fn decompose_with_fallback(
    decomposer: &dyn Decomposer,
    series: &[f64],
    periods_per_year: usize,
    method: DecomposeMethod,
    fallback: Option<DecomposeMethod>,
) -> Result<(Components, DecomposeMethod), DecomposeFailure> {
    let run = |m: DecomposeMethod| {
        decomposer
            .decompose_raw(series, periods_per_year, m)
            .and_then(|c| {
                if c.trend.len() == series.len() && c.seasonally_adjusted.len() == series.len() {
                    Ok(c)
                } else {
                    Err(format!("{m} returned components of the wrong length"))
                }
            })
            .map_err(|e| format!("{m}: {e}"))
    };
    let primary = match run(method) {
        Ok(components) => return Ok((components, method)),
        Err(e) => e,
    };
    let Some(fallback) = fallback else {
        return Err(DecomposeFailure {
            primary,
            fallback: "no fallback method configured".to_string(),
        });
    };
    tracing::warn!(%method, %fallback, error = %primary, "decomposition failed, retrying with fallback");
    run(fallback)
        .map(|components| (components, fallback))
        .map_err(|fallback| DecomposeFailure { primary, fallback })
}

impl Dataset {
    /// Keep the trend or seasonally adjusted component of every column.
    ///
    /// Needs at least three years of observations; shorter datasets fail
    /// before `decomposer` is called. Leading and trailing missing values are
    /// carried through; a gap inside a column is rejected.
    pub fn decompose(
        &self,
        method: DecomposeMethod,
        component: Component,
        fallback: Option<DecomposeMethod>,
        decomposer: &dyn Decomposer,
    ) -> Result<Dataset, DataError> {
        let frequency = self.uniform_frequency("decompose")?;
        let metadata = self
            .metadata()
            .derive(self.name(), &MetadataOp::Decompose { component })?;
        // Derivation only admits monthly and quarterly data.
        let per_year = frequency.periods_per_year().unwrap_or(1);
        let required = 3 * per_year;
        let operation = format!("decompose({method})");

        let mut spans = Vec::with_capacity(self.width());
        for (key, column) in self.columns() {
            let first = column.iter().position(Option::is_some);
            let last = column.iter().rposition(Option::is_some);
            let (first, last) = match (first, last) {
                (Some(f), Some(l)) => (f, l),
                _ => (0, 0),
            };
            let span = if column.is_empty() || column[first].is_none() {
                &column[0..0]
            } else {
                &column[first..=last]
            };
            if span.len() < required {
                return Err(DataError::InsufficientData {
                    dataset: self.name().to_string(),
                    operation,
                    required,
                    available: span.len(),
                });
            }
            let Some(series) = span.iter().copied().collect::<Option<Vec<f64>>>() else {
                return Err(DataError::IncompatibleTransform {
                    dataset: self.name().to_string(),
                    column: key.to_string(),
                    operation,
                    reason: "column has missing values between its first and last observation"
                        .to_string(),
                });
            };
            spans.push((key, first, series));
        }

        let mut values: Vec<Vec<Option<f64>>> = Vec::with_capacity(self.width());
        for (key, first, series) in spans {
            let (components, used) =
                decompose_with_fallback(decomposer, &series, per_year, method, fallback).map_err(
                    |failure| DataError::Decomposition {
                        dataset: self.name().to_string(),
                        column: key.to_string(),
                        primary: failure.primary,
                        fallback: failure.fallback,
                    },
                )?;
            if used != method {
                tracing::info!(dataset = self.name(), column = key, method = %used, "decomposed with fallback");
            }
            let mut out = vec![None; self.len()];
            out[first..first + series.len()].copy_from_slice(components.pick(component));
            values.push(out);
        }

        self.derived(
            self.index().to_vec(),
            self.keys().to_vec(),
            values,
            metadata,
            Transform::Decompose {
                method,
                component,
                fallback,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{SeasonalAdjustment, SeriesType};
    use crate::period::Frequency;
    use crate::transform::test_support::series;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and fails for every method except `ma`.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Decomposer for Counting {
        fn decompose_raw(
            &self,
            series: &[f64],
            periods_per_year: usize,
            method: DecomposeMethod,
        ) -> Result<Components, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                DecomposeMethod::MovingAverage => {
                    ClassicalDecomposer.decompose_raw(series, periods_per_year, method)
                }
                _ => Err("binary not found".to_string()),
            }
        }
    }

    fn seasonal_quarterly(years: usize) -> Vec<f64> {
        let pattern = [3.0, -1.0, -4.0, 2.0];
        (0..years * 4).map(|t| 100.0 + 0.5 * t as f64 + pattern[t % 4]).collect()
    }

    #[test]
    fn classical_recovers_linear_trend() {
        let values = seasonal_quarterly(3);
        let ds = series("gdp", Frequency::Quarterly, SeriesType::Flow, 2020, &values);
        let out = ds
            .decompose(DecomposeMethod::MovingAverage, Component::SeasonallyAdjusted, None, &ClassicalDecomposer)
            .unwrap();
        for (t, v) in out.column("value").unwrap().iter().enumerate() {
            assert!((v.unwrap() - (100.0 + 0.5 * t as f64)).abs() < 1e-9);
        }
        assert_eq!(
            out.metadata().get("value").unwrap().seasonal_adjustment,
            SeasonalAdjustment::SeasonallyAdjusted
        );

        let trend = ds
            .decompose(DecomposeMethod::MovingAverage, Component::Trend, None, &ClassicalDecomposer)
            .unwrap();
        let col = trend.column("value").unwrap();
        assert!(col[0].is_none() && col[11].is_none());
        assert!((col[5].unwrap() - 102.5).abs() < 1e-9);
    }

    #[test]
    fn short_series_never_reaches_the_decomposer() {
        let decomposer = Counting::default();
        let ds = series("gdp", Frequency::Quarterly, SeriesType::Flow, 2020, &seasonal_quarterly(2));
        let err = ds
            .decompose(DecomposeMethod::X13, Component::Trend, Some(DecomposeMethod::MovingAverage), &decomposer)
            .unwrap_err();
        assert!(matches!(err, DataError::InsufficientData { required: 12, available: 8, .. }));
        assert_eq!(decomposer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn falls_back_once() {
        let decomposer = Counting::default();
        let ds = series("gdp", Frequency::Quarterly, SeriesType::Flow, 2020, &seasonal_quarterly(3));
        let out = ds
            .decompose(DecomposeMethod::X13, Component::Trend, Some(DecomposeMethod::MovingAverage), &decomposer)
            .unwrap();
        assert_eq!(decomposer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            out.history().last(),
            Some(&Transform::Decompose {
                method: DecomposeMethod::X13,
                component: Component::Trend,
                fallback: Some(DecomposeMethod::MovingAverage),
            })
        );
    }

    #[test]
    fn both_failures_are_named() {
        let decomposer = Counting::default();
        let ds = series("gdp", Frequency::Quarterly, SeriesType::Flow, 2020, &seasonal_quarterly(3));
        let err = ds
            .decompose(DecomposeMethod::X13, Component::Trend, Some(DecomposeMethod::Loess), &decomposer)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("x13"), "{message}");
        assert!(message.contains("loess"), "{message}");
        assert_eq!(decomposer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn interior_gap_is_rejected_and_edges_are_kept() {
        let values = seasonal_quarterly(4);
        let mut with_gap: Vec<Option<f64>> = values.iter().map(|v| Some(*v)).collect();
        with_gap[0] = None;
        with_gap[15] = None;
        let base = series("gdp", Frequency::Quarterly, SeriesType::Flow, 2020, &values);
        let trimmed = Dataset::new(
            "gdp",
            base.index().to_vec(),
            vec![("value".into(), with_gap.clone())],
            base.metadata().clone(),
        )
        .unwrap();
        let out = trimmed
            .decompose(DecomposeMethod::MovingAverage, Component::SeasonallyAdjusted, None, &ClassicalDecomposer)
            .unwrap();
        let col = out.column("value").unwrap();
        assert!(col[0].is_none() && col[15].is_none());
        assert!(col[1..15].iter().all(Option::is_some));

        with_gap[7] = None;
        let gapped = Dataset::new(
            "gdp",
            base.index().to_vec(),
            vec![("value".into(), with_gap)],
            base.metadata().clone(),
        )
        .unwrap();
        let err = gapped
            .decompose(DecomposeMethod::MovingAverage, Component::Trend, None, &ClassicalDecomposer)
            .unwrap_err();
        assert!(matches!(err, DataError::IncompatibleTransform { .. }));
    }

    #[test]
    fn already_adjusted_is_incompatible() {
        let ds = series("gdp", Frequency::Quarterly, SeriesType::Flow, 2020, &seasonal_quarterly(3));
        let sa = ds
            .decompose(DecomposeMethod::MovingAverage, Component::SeasonallyAdjusted, None, &ClassicalDecomposer)
            .unwrap();
        let err = sa
            .decompose(DecomposeMethod::MovingAverage, Component::Trend, None, &ClassicalDecomposer)
            .unwrap_err();
        assert!(matches!(err, DataError::IncompatibleTransform { .. }));
    }
}
