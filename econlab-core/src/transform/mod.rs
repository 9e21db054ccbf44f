//! Transformation pipeline.
//!
//! Every operation consumes a `&Dataset` and returns a new [`Dataset`] with
//! derived metadata. Metadata derivation runs first, so an incompatible
//! request fails before any value is computed. [`Transform`] is the closed,
//! serializable form of a pipeline step; [`Dataset::apply`] dispatches it.

pub mod change;
pub mod convert;
pub mod decompose;
pub mod rebase;
pub mod resample;
pub mod rolling;

pub use decompose::{
    decompose_with_fallback, ClassicalDecomposer, Components, DecomposeFailure, Decomposer,
};

use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::MetadataOp;
use crate::period::Frequency;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

tag_enum!(
    /// Bin aggregation for `resample`.
    ResampleOp {
        Sum => "sum",
        Mean => "mean",
        Last => "last",
        First => "first",
    }
);

tag_enum!(
    /// Kind of change computed by `chg_diff`.
    ChangeOp {
        PctChange => "pct_change",
        Diff => "diff",
    }
);

tag_enum!(
    /// Comparison period for `chg_diff`.
    ChangePeriod {
        Last => "last",
        YearOverYear => "yoy",
        Annualized => "annualized",
    }
);

tag_enum!(
    /// Component kept by `decompose`.
    Component {
        Trend => "trend",
        SeasonallyAdjusted => "seasonally_adjusted",
    }
);

tag_enum!(
    /// Seasonal decomposition method.
    DecomposeMethod {
        X13 => "x13",
        Loess => "loess",
        MovingAverage => "ma",
    }
);

tag_enum!(
    /// Target of `convert`.
    ConvertFlavor {
        Usd => "usd",
        ConstantPrices => "constant_prices",
        PercentGdp => "percent_gdp",
    }
);

tag_enum!(
    /// Window aggregation for `rolling`.
    RollingOp {
        Mean => "mean",
        Sum => "sum",
    }
);

fn default_base() -> f64 {
    100.0
}

/// One pipeline step with its parameters.
///
/// Serialized with an internal `type` tag so registries can list default
/// chains, e.g. `{ type = "resample", rule = "annual", operation = "sum" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Select {
        columns: Vec<String>,
    },
    Filter {
        #[serde(default)]
        start: Option<NaiveDate>,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    Resample {
        rule: Frequency,
        operation: ResampleOp,
    },
    ChgDiff {
        operation: ChangeOp,
        period: ChangePeriod,
    },
    Decompose {
        method: DecomposeMethod,
        component: Component,
        #[serde(default)]
        fallback: Option<DecomposeMethod>,
    },
    Convert {
        flavor: ConvertFlavor,
        #[serde(default)]
        start: Option<NaiveDate>,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    Rebase {
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
        #[serde(default = "default_base")]
        base: f64,
    },
    Rolling {
        #[serde(default)]
        window: Option<usize>,
        operation: RollingOp,
    },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Select { .. } => "select",
            Transform::Filter { .. } => "filter",
            Transform::Resample { .. } => "resample",
            Transform::ChgDiff { .. } => "chg_diff",
            Transform::Decompose { .. } => "decompose",
            Transform::Convert { .. } => "convert",
            Transform::Rebase { .. } => "rebase",
            Transform::Rolling { .. } => "rolling",
        }
    }
}

/// Supplies the exchange-rate, price-index and GDP datasets used by `convert`.
pub trait AuxiliarySource: Send + Sync {
    fn auxiliary(&self, flavor: ConvertFlavor) -> Result<Dataset, DataError>;
}

/// Collaborators a chain may need beyond the dataset itself.
#[derive(Clone, Copy)]
pub struct TransformContext<'a> {
    pub decomposer: &'a dyn Decomposer,
    pub auxiliary: Option<&'a dyn AuxiliarySource>,
}

impl<'a> TransformContext<'a> {
    pub fn new(decomposer: &'a dyn Decomposer) -> Self {
        Self {
            decomposer,
            auxiliary: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: &'a dyn AuxiliarySource) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }
}

impl Dataset {
    /// The frequency shared by every column.
    pub(crate) fn uniform_frequency(&self, operation: &str) -> Result<Frequency, DataError> {
        let mut entries = self.metadata().iter();
        let Some(first) = entries.next() else {
            return Err(DataError::IncompatibleTransform {
                dataset: self.name().to_string(),
                column: "*".to_string(),
                operation: operation.to_string(),
                reason: "dataset has no columns".to_string(),
            });
        };
        let frequency = first.metadata.frequency;
        if let Some(other) = entries.find(|e| e.metadata.frequency != frequency) {
            return Err(DataError::IncompatibleTransform {
                dataset: self.name().to_string(),
                column: other.key.clone(),
                operation: operation.to_string(),
                reason: format!(
                    "column is {} while '{}' is {frequency}",
                    other.metadata.frequency, first.key
                ),
            });
        }
        Ok(frequency)
    }

    /// Apply one step.
    pub fn apply(&self, step: &Transform, ctx: &TransformContext<'_>) -> Result<Dataset, DataError> {
        match step {
            Transform::Select { columns } => self.select(columns),
            Transform::Filter { start, end } => Ok(self.filter(*start, *end)),
            Transform::Resample { rule, operation } => self.resample(*rule, *operation),
            Transform::ChgDiff { operation, period } => self.chg_diff(*operation, *period),
            Transform::Decompose {
                method,
                component,
                fallback,
            } => self.decompose(*method, *component, *fallback, ctx.decomposer),
            Transform::Convert { flavor, start, end } => {
                self.uniform_frequency("convert")?;
                self.metadata()
                    .derive(self.name(), &MetadataOp::Convert { flavor: *flavor })?;
                let source = ctx.auxiliary.ok_or_else(|| DataError::MissingAuxiliary {
                    dataset: self.name().to_string(),
                    kind: flavor.to_string(),
                })?;
                let aux = source.auxiliary(*flavor)?;
                self.convert(*flavor, &aux, *start, *end)
            }
            Transform::Rebase { start, end, base } => self.rebase(*start, *end, *base),
            Transform::Rolling { window, operation } => self.rolling(*window, *operation),
        }
    }
}

/// Apply `steps` in order, stopping at the first failure.
pub fn apply_chain(
    dataset: &Dataset,
    steps: &[Transform],
    ctx: &TransformContext<'_>,
) -> Result<Dataset, DataError> {
    let mut current = dataset.clone();
    for step in steps {
        current = current.apply(step, ctx)?;
    }
    Ok(current)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::dataset::Dataset;
    use crate::metadata::{sample_metadata, DatasetMetadata, SeriesType};
    use crate::period::Frequency;
    use chrono::NaiveDate;

    /// Consecutive period ends starting at `year-month` for `n` periods.
    pub fn periods(frequency: Frequency, year: i32, month: u32, n: usize) -> Vec<NaiveDate> {
        let step = match frequency {
            Frequency::Quarterly => 3,
            Frequency::Annual => 12,
            _ => 1,
        };
        (0..n)
            .map(|i| {
                let m0 = (month - 1) as usize + i * step;
                let y = year + (m0 / 12) as i32;
                let m = (m0 % 12) as u32 + 1;
                frequency.period_end(NaiveDate::from_ymd_opt(y, m, 1).unwrap())
            })
            .collect()
    }

    /// Single-column dataset with the given tags.
    pub fn series(
        name: &str,
        frequency: Frequency,
        series_type: SeriesType,
        start_year: i32,
        values: &[f64],
    ) -> Dataset {
        let index = periods(frequency, start_year, 1, values.len());
        let meta = DatasetMetadata::new(vec![(
            "value".to_string(),
            sample_metadata(name, frequency, series_type),
        )]);
        Dataset::new(
            name,
            index,
            vec![("value".to_string(), values.iter().map(|v| Some(*v)).collect())],
            meta,
        )
        .unwrap()
    }
}
