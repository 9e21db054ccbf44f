//! Per-column semantic tags and the rules for carrying them through transforms.
//!
//! Each column of a [`crate::dataset::Dataset`] has exactly one
//! [`IndicatorMetadata`]. [`IndicatorMetadata::derive`] is the single place that
//! decides whether a transform is defined for a column's current tags and what
//! the tags look like afterwards; transforms call it before touching data.

use crate::error::{DataError, DeriveError};
use crate::period::Frequency;
use crate::transform::{ChangeOp, ChangePeriod, Component, ConvertFlavor, ResampleOp, RollingOp};
use serde::{Deserialize, Serialize};

tag_enum!(
    /// Topical category of an indicator.
    Area {
        Activity => "activity",
        Prices => "prices",
        Fiscal => "fiscal",
        Labor => "labor",
        External => "external",
        Financial => "financial",
        Income => "income",
        Global => "global",
        Regional => "regional",
    }
);

tag_enum!(
    /// Currency a series is denominated in.
    Currency {
        Local => "local",
        Usd => "usd",
        None => "none",
    }
);

tag_enum!(
    /// Price-level treatment of a series.
    InflationAdjustment {
        None => "none",
        ConstantPrices => "constant-prices",
        Real => "real",
    }
);

tag_enum!(
    /// Seasonal treatment of a series.
    SeasonalAdjustment {
        None => "none",
        Trend => "trend",
        SeasonallyAdjusted => "seasonally-adjusted",
    }
);

tag_enum!(
    /// Point-in-time level (stock) or amount accumulated over a period (flow).
    SeriesType {
        Stock => "stock",
        Flow => "flow",
    }
);

/// Unit written by `rebase`.
pub const INDEX_UNIT: &str = "index";
/// Unit written by `convert` to percent of GDP.
pub const PERCENT_GDP_UNIT: &str = "% GDP";

/// Semantic tags of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorMetadata {
    pub name: String,
    pub area: Area,
    pub frequency: Frequency,
    pub currency: Currency,
    pub inflation_adjustment: InflationAdjustment,
    pub unit: String,
    pub seasonal_adjustment: SeasonalAdjustment,
    #[serde(rename = "type")]
    pub series_type: SeriesType,
    pub cumulative_periods: u32,
}

/// A transform's effect on metadata, as seen by [`IndicatorMetadata::derive`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetadataOp {
    Resample { target: Frequency, operation: ResampleOp },
    ChangeDiff { operation: ChangeOp, period: ChangePeriod },
    Decompose { component: Component },
    Convert { flavor: ConvertFlavor },
    Rebase,
    Rolling { window: usize, operation: RollingOp },
}

impl MetadataOp {
    /// Operation name used in error messages and transformation history.
    pub fn name(&self) -> &'static str {
        match self {
            MetadataOp::Resample { .. } => "resample",
            MetadataOp::ChangeDiff { .. } => "chg_diff",
            MetadataOp::Decompose { .. } => "decompose",
            MetadataOp::Convert { .. } => "convert",
            MetadataOp::Rebase => "rebase",
            MetadataOp::Rolling { .. } => "rolling",
        }
    }
}

impl IndicatorMetadata {
    /// Check field-level invariants. Enum fields are closed by construction.
    pub fn validate(&self, column: &str) -> Result<(), DataError> {
        let invalid = |reason: &str| DataError::InvalidMetadata {
            column: column.to_string(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("indicator name is empty"));
        }
        if self.unit.trim().is_empty() {
            return Err(invalid("unit is empty"));
        }
        if self.cumulative_periods < 1 {
            return Err(invalid("cumulative_periods must be at least 1"));
        }
        Ok(())
    }

    /// Metadata after applying `op`, or why `op` is undefined for these tags.
    pub fn derive(&self, op: &MetadataOp) -> Result<Self, DeriveError> {
        let mut out = self.clone();
        match *op {
            MetadataOp::Resample { target, operation } => {
                if !self.frequency.is_coarser(target) {
                    return Err(DeriveError(format!(
                        "cannot resample {} data to {target}; only downsampling is supported",
                        self.frequency
                    )));
                }
                match (self.series_type, operation) {
                    (SeriesType::Stock, ResampleOp::Sum) => {
                        return Err(DeriveError(
                            "a stock series cannot be summed; use last, first or mean".into(),
                        ));
                    }
                    (SeriesType::Flow, ResampleOp::Last | ResampleOp::First) => {
                        return Err(DeriveError(format!(
                            "a flow series aggregates with sum or mean, not {operation}"
                        )));
                    }
                    (SeriesType::Flow, ResampleOp::Sum) if self.cumulative_periods > 1 => {
                        return Err(DeriveError(format!(
                            "series already accumulates {} periods; summing would double count",
                            self.cumulative_periods
                        )));
                    }
                    _ => {}
                }
                out.cumulative_periods = match self.frequency.bin_ratio(target) {
                    Some(ratio) => self.cumulative_periods.div_ceil(ratio as u32).max(1),
                    None => 1,
                };
                out.frequency = target;
            }
            MetadataOp::ChangeDiff { operation, period } => {
                if operation == ChangeOp::Diff && period == ChangePeriod::Annualized {
                    return Err(DeriveError(
                        "annualizing a difference is undefined; use pct_change".into(),
                    ));
                }
                if period != ChangePeriod::Last && self.frequency.periods_per_year().is_none() {
                    return Err(DeriveError(format!(
                        "{period} changes need monthly, quarterly or annual data, got {}",
                        self.frequency
                    )));
                }
                out.unit = match (operation, period) {
                    (ChangeOp::PctChange, ChangePeriod::Last) => "% change",
                    (ChangeOp::PctChange, ChangePeriod::YearOverYear) => "% change YoY",
                    (ChangeOp::PctChange, ChangePeriod::Annualized) => "% change annualized",
                    (ChangeOp::Diff, ChangePeriod::Last) => "change",
                    (ChangeOp::Diff, _) => "change YoY",
                }
                .to_string();
            }
            MetadataOp::Decompose { component } => {
                if self.seasonal_adjustment != SeasonalAdjustment::None {
                    return Err(DeriveError(format!(
                        "series is already {}",
                        self.seasonal_adjustment
                    )));
                }
                if !matches!(self.frequency, Frequency::Monthly | Frequency::Quarterly) {
                    return Err(DeriveError(format!(
                        "seasonal decomposition needs monthly or quarterly data, got {}",
                        self.frequency
                    )));
                }
                out.seasonal_adjustment = match component {
                    Component::Trend => SeasonalAdjustment::Trend,
                    Component::SeasonallyAdjusted => SeasonalAdjustment::SeasonallyAdjusted,
                };
            }
            MetadataOp::Convert { flavor } => match flavor {
                ConvertFlavor::Usd => {
                    if self.currency != Currency::Local {
                        return Err(DeriveError(format!(
                            "USD conversion needs a local-currency series, found {}",
                            self.currency
                        )));
                    }
                    out.currency = Currency::Usd;
                }
                ConvertFlavor::ConstantPrices => {
                    if self.currency != Currency::Local {
                        return Err(DeriveError(format!(
                            "constant-prices conversion needs a local-currency series, found {}",
                            self.currency
                        )));
                    }
                    if self.inflation_adjustment != InflationAdjustment::None {
                        return Err(DeriveError(format!(
                            "series is already {}",
                            self.inflation_adjustment
                        )));
                    }
                    out.inflation_adjustment = InflationAdjustment::ConstantPrices;
                }
                ConvertFlavor::PercentGdp => {
                    if matches!(self.area, Area::Global | Area::Regional) {
                        return Err(DeriveError(format!(
                            "{} series are not measured against domestic GDP",
                            self.area
                        )));
                    }
                    if self.unit == PERCENT_GDP_UNIT {
                        return Err(DeriveError("series is already in % GDP".into()));
                    }
                    if self.currency == Currency::None {
                        return Err(DeriveError(
                            "series has no currency to match against GDP".into(),
                        ));
                    }
                    if self.series_type == SeriesType::Flow {
                        let Some(per_year) = self.frequency.periods_per_year() else {
                            return Err(DeriveError(format!(
                                "flow series need a calendar frequency for % GDP, got {}",
                                self.frequency
                            )));
                        };
                        if per_year as u32 % self.cumulative_periods != 0 {
                            return Err(DeriveError(format!(
                                "cannot annualize a {}-period accumulation of {} data",
                                self.cumulative_periods, self.frequency
                            )));
                        }
                        out.cumulative_periods = per_year as u32;
                    }
                    out.unit = PERCENT_GDP_UNIT.to_string();
                }
            },
            MetadataOp::Rebase => {
                out.unit = INDEX_UNIT.to_string();
            }
            MetadataOp::Rolling { window, operation } => {
                if operation == RollingOp::Sum {
                    if self.series_type == SeriesType::Stock {
                        return Err(DeriveError(
                            "rolling sums of a stock series are undefined".into(),
                        ));
                    }
                    if self.cumulative_periods > 1 {
                        return Err(DeriveError(format!(
                            "series already accumulates {} periods; summing would double count",
                            self.cumulative_periods
                        )));
                    }
                    out.cumulative_periods = window as u32;
                }
            }
        }
        Ok(out)
    }
}

/// Metadata entry for one column key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub key: String,
    pub metadata: IndicatorMetadata,
}

/// Ordered mapping from column key to [`IndicatorMetadata`], in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetMetadata {
    entries: Vec<ColumnMetadata>,
}

impl DatasetMetadata {
    pub fn new(entries: Vec<(String, IndicatorMetadata)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, metadata)| ColumnMetadata { key, metadata })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<&IndicatorMetadata> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.metadata)
    }

    /// Check that keys match `columns` exactly, in order, and every entry is valid.
    pub fn validate(&self, columns: &[String]) -> Result<(), DataError> {
        for column in columns {
            if self.get(column).is_none() {
                return Err(DataError::InvalidMetadata {
                    column: column.clone(),
                    reason: "column has no metadata entry".into(),
                });
            }
        }
        for entry in &self.entries {
            if !columns.contains(&entry.key) {
                return Err(DataError::InvalidMetadata {
                    column: entry.key.clone(),
                    reason: "metadata entry has no matching column".into(),
                });
            }
        }
        if self.entries.len() != columns.len() {
            return Err(DataError::InvalidMetadata {
                column: columns.join(","),
                reason: "duplicate column or metadata key".into(),
            });
        }
        for (entry, column) in self.entries.iter().zip(columns) {
            if &entry.key != column {
                return Err(DataError::InvalidMetadata {
                    column: column.clone(),
                    reason: format!("metadata is ordered differently (found '{}')", entry.key),
                });
            }
            entry.metadata.validate(&entry.key)?;
        }
        Ok(())
    }

    /// Derive every entry, failing on the first column for which `op` is undefined.
    pub fn derive(&self, dataset: &str, op: &MetadataOp) -> Result<Self, DataError> {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                e.metadata
                    .derive(op)
                    .map(|metadata| ColumnMetadata {
                        key: e.key.clone(),
                        metadata,
                    })
                    .map_err(|reason| DataError::IncompatibleTransform {
                        dataset: dataset.to_string(),
                        column: e.key.clone(),
                        operation: op.name().to_string(),
                        reason: reason.0,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Entries for `keys`, in the order given.
    pub(crate) fn subset(&self, keys: &[String]) -> Self {
        Self {
            entries: keys
                .iter()
                .filter_map(|k| self.entries.iter().find(|e| &e.key == k).cloned())
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_metadata(name: &str, frequency: Frequency, series_type: SeriesType) -> IndicatorMetadata {
    IndicatorMetadata {
        name: name.to_string(),
        area: Area::Activity,
        frequency,
        currency: Currency::Local,
        inflation_adjustment: InflationAdjustment::None,
        unit: "millions".to_string(),
        seasonal_adjustment: SeasonalAdjustment::None,
        series_type,
        cumulative_periods: 1,
    }
}
