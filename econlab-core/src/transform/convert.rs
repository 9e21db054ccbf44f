//! Currency, price-level and GDP-ratio conversion against an auxiliary dataset.
//!
//! - `usd`: divide by the exchange rate; end-of-period rates for stocks,
//!   period-average rates (rolled over the cumulative periods) for flows.
//! - `constant_prices`: divide by the period-average price index (rolled over
//!   the cumulative periods), optionally rescaled to prices of a base window.
//! - `percent_gdp`: annualize flows with a rolling sum, then divide by the
//!   annualized GDP column whose currency matches and multiply by 100.
//!
//! Auxiliary periods that are missing or misaligned produce missing values.

use super::rolling::rolling_window;
use super::{ConvertFlavor, ResampleOp, RollingOp, Transform};
use crate::data::align::aggregate_by_period;
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::{IndicatorMetadata, MetadataOp, SeriesType};
use crate::period::Frequency;
use chrono::NaiveDate;
use std::collections::BTreeMap;

impl Dataset {
    /// Convert every column using `aux`. `start`/`end` set the base window
    /// for `constant_prices` and are ignored otherwise.
    pub fn convert(
        &self,
        flavor: ConvertFlavor,
        aux: &Dataset,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Dataset, DataError> {
        let frequency = self.uniform_frequency("convert")?;
        let metadata = self
            .metadata()
            .derive(self.name(), &MetadataOp::Convert { flavor })?;
        if aux.width() == 0 {
            return Err(DataError::MissingAuxiliary {
                dataset: self.name().to_string(),
                kind: flavor.to_string(),
            });
        }

        let mut values: Vec<Vec<Option<f64>>> = Vec::with_capacity(self.width());
        for entry in self.metadata().iter() {
            let column = self.column(&entry.key).unwrap_or_default();
            let meta = &entry.metadata;
            let converted = match flavor {
                ConvertFlavor::Usd => {
                    let op = match meta.series_type {
                        SeriesType::Stock => ResampleOp::Last,
                        SeriesType::Flow => ResampleOp::Mean,
                    };
                    let rates = self.aux_per_period(aux, 0, frequency, op);
                    let rates = roll_for_flow(rates, meta);
                    divide(column, &rates, 1.0)
                }
                ConvertFlavor::ConstantPrices => {
                    let prices = self.aux_per_period(aux, 0, frequency, ResampleOp::Mean);
                    let prices = roll_for_flow(prices, meta);
                    let factor = self.base_factor(&prices, start, end)?;
                    divide(column, &prices, factor)
                }
                ConvertFlavor::PercentGdp => {
                    let gdp = self.gdp_for(aux, meta, &entry.key)?;
                    let annual = annualize(column, meta, frequency);
                    divide(&annual, &gdp, 100.0)
                }
            };
            values.push(converted);
        }

        tracing::debug!(dataset = self.name(), %flavor, auxiliary = aux.name(), "converted");
        self.derived(
            self.index().to_vec(),
            self.keys().to_vec(),
            values,
            metadata,
            Transform::Convert { flavor, start, end },
        )
    }

    /// Auxiliary column `pos` aggregated to `frequency` and aligned to `self`.
    fn aux_per_period(
        &self,
        aux: &Dataset,
        pos: usize,
        frequency: Frequency,
        op: ResampleOp,
    ) -> Vec<Option<f64>> {
        let by_period = aggregate_by_period(aux.index(), &aux.values()[pos], frequency, op);
        self.index()
            .iter()
            .map(|d| by_period.get(&frequency.period_end(*d)).copied())
            .collect()
    }

    /// Mean price over the base window, or 1 without one.
    fn base_factor(
        &self,
        prices: &[Option<f64>],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<f64, DataError> {
        let Some(start) = start else {
            return Ok(1.0);
        };
        let rows: Vec<usize> = match end {
            Some(end) => (0..self.len())
                .filter(|&i| self.index()[i] >= start && self.index()[i] <= end)
                .collect(),
            None => (0..self.len())
                .min_by_key(|&i| (self.index()[i] - start).num_days().abs())
                .into_iter()
                .collect(),
        };
        let present: Vec<f64> = rows.iter().filter_map(|&i| prices[i]).collect();
        if present.is_empty() {
            return Err(DataError::InvalidWindow {
                dataset: self.name().to_string(),
                operation: "convert".to_string(),
                window: match end {
                    Some(end) => format!("{start}..={end}"),
                    None => format!("nearest to {start}"),
                },
                reason: "no price index observations in the base window".to_string(),
            });
        }
        Ok(present.iter().sum::<f64>() / present.len() as f64)
    }

    /// Annualized GDP in the column's currency, aligned to `self`.
    fn gdp_for(
        &self,
        gdp: &Dataset,
        meta: &IndicatorMetadata,
        key: &str,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let Some((pos, gdp_meta)) = gdp
            .metadata()
            .iter()
            .enumerate()
            .find(|(_, e)| e.metadata.currency == meta.currency)
            .map(|(pos, e)| (pos, &e.metadata))
        else {
            return Err(DataError::MissingAuxiliary {
                dataset: self.name().to_string(),
                kind: format!("GDP in {} for column '{key}'", meta.currency),
            });
        };
        let gdp_frequency = gdp_meta.frequency;
        let annual = annualize(&gdp.values()[pos], gdp_meta, gdp_frequency);
        let lookup: BTreeMap<NaiveDate, f64> = gdp
            .index()
            .iter()
            .zip(annual)
            .filter_map(|(d, v)| v.map(|v| (*d, v)))
            .collect();
        Ok(self
            .index()
            .iter()
            .map(|d| lookup.get(&gdp_frequency.period_end(*d)).copied())
            .collect())
    }
}

/// Rolling mean over the series' cumulative periods, for flows.
fn roll_for_flow(aligned: Vec<Option<f64>>, meta: &IndicatorMetadata) -> Vec<Option<f64>> {
    if meta.series_type == SeriesType::Flow && meta.cumulative_periods > 1 {
        rolling_window(&aligned, meta.cumulative_periods as usize, RollingOp::Mean)
    } else {
        aligned
    }
}

/// Rolling sum that turns a flow into a one-year accumulation.
fn annualize(values: &[Option<f64>], meta: &IndicatorMetadata, frequency: Frequency) -> Vec<Option<f64>> {
    let per_year = frequency.periods_per_year().unwrap_or(1) as u32;
    if meta.series_type == SeriesType::Flow && meta.cumulative_periods < per_year {
        let window = (per_year / meta.cumulative_periods.max(1)) as usize;
        rolling_window(values, window, RollingOp::Sum)
    } else {
        values.to_vec()
    }
}

fn divide(values: &[Option<f64>], by: &[Option<f64>], scale: f64) -> Vec<Option<f64>> {
    values
        .iter()
        .zip(by)
        .map(|(v, d)| match (v, d) {
            (Some(v), Some(d)) => Some(v / d * scale),
            _ => None,
        })
        .collect()
}
