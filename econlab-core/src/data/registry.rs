//! Read-only registry of known datasets.
//!
//! Parsed once from TOML and shared as `Arc<Registry>`:
//!
//! ```toml
//! [auxiliary]
//! usd = "nxr"
//! constant_prices = "cpi"
//! percent_gdp = "gdp"
//!
//! [datasets.cpi]
//! source = "ine"
//! frequency = "monthly"
//! revise_rows = "auto"
//! indicator = { area = "prices", unit = "index", type = "stock" }
//!
//! [datasets.cpi.columns.headline]
//! name = "Consumer price index"
//! ```

use crate::error::DataError;
use crate::metadata::{
    Area, Currency, IndicatorMetadata, InflationAdjustment, SeasonalAdjustment, SeriesType,
};
use crate::period::Frequency;
use crate::transform::{ConvertFlavor, Transform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn default_staleness_hours() -> u64 {
    24
}

/// Staleness window of `hours`, saturating at the largest representable span.
pub fn staleness_window(hours: u64) -> chrono::Duration {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_cumulative() -> u32 {
    1
}

/// How overlapping periods are reconciled when merging a fresh fetch into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RevisionSetting", into = "RevisionSetting")]
pub enum RevisionPolicy {
    /// Any period present in both wins from the fresh fetch.
    #[default]
    NoDuplicates,
    /// The last `n` cached periods are replaced by the fresh fetch.
    LastN(usize),
    /// `LastN` with `n` inferred from the dataset frequency.
    Automatic,
}

impl RevisionPolicy {
    /// Number of trailing cached periods to replace, or `None` for no-duplication.
    pub fn trailing_rows(self, frequency: Frequency) -> Option<usize> {
        match self {
            RevisionPolicy::NoDuplicates => None,
            RevisionPolicy::LastN(n) => Some(n),
            RevisionPolicy::Automatic => Some(match frequency {
                Frequency::Daily => 10,
                Frequency::Monthly => 3,
                Frequency::Quarterly => 2,
                Frequency::Annual => 1,
                Frequency::Irregular => 3,
            }),
        }
    }
}

/// Wire form of `revise_rows`: a row count or `"nodup"` / `"auto"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RevisionSetting {
    Rows(usize),
    Keyword(String),
}

impl TryFrom<RevisionSetting> for RevisionPolicy {
    type Error = String;

    fn try_from(value: RevisionSetting) -> Result<Self, Self::Error> {
        match value {
            RevisionSetting::Rows(n) => Ok(RevisionPolicy::LastN(n)),
            RevisionSetting::Keyword(k) => match k.to_ascii_lowercase().as_str() {
                "nodup" | "no_duplicates" => Ok(RevisionPolicy::NoDuplicates),
                "auto" => Ok(RevisionPolicy::Automatic),
                other => Err(format!(
                    "revise_rows must be a row count, \"nodup\" or \"auto\", got \"{other}\""
                )),
            },
        }
    }
}

impl From<RevisionPolicy> for RevisionSetting {
    fn from(value: RevisionPolicy) -> Self {
        match value {
            RevisionPolicy::NoDuplicates => RevisionSetting::Keyword("nodup".into()),
            RevisionPolicy::LastN(n) => RevisionSetting::Rows(n),
            RevisionPolicy::Automatic => RevisionSetting::Keyword("auto".into()),
        }
    }
}

/// Tags shared by every column of a dataset unless overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDefaults {
    pub area: Area,
    #[serde(default = "IndicatorDefaults::default_currency")]
    pub currency: Currency,
    #[serde(default = "IndicatorDefaults::default_inflation")]
    pub inflation_adjustment: InflationAdjustment,
    pub unit: String,
    #[serde(default = "IndicatorDefaults::default_seasonal")]
    pub seasonal_adjustment: SeasonalAdjustment,
    #[serde(rename = "type")]
    pub series_type: SeriesType,
    #[serde(default = "default_cumulative")]
    pub cumulative_periods: u32,
}

impl IndicatorDefaults {
    fn default_currency() -> Currency {
        Currency::Local
    }

    fn default_inflation() -> InflationAdjustment {
        InflationAdjustment::None
    }

    fn default_seasonal() -> SeasonalAdjustment {
        SeasonalAdjustment::None
    }
}

/// Per-column overrides of [`IndicatorDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorOverride {
    pub name: Option<String>,
    pub area: Option<Area>,
    pub currency: Option<Currency>,
    pub inflation_adjustment: Option<InflationAdjustment>,
    pub unit: Option<String>,
    pub seasonal_adjustment: Option<SeasonalAdjustment>,
    #[serde(rename = "type")]
    pub series_type: Option<SeriesType>,
    pub cumulative_periods: Option<u32>,
}

/// Registry entry for one named dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Registry key; filled from the table name when parsing.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: String,
    pub frequency: Frequency,
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u64,
    #[serde(default)]
    pub revise_rows: RevisionPolicy,
    /// Default transform chain applied by callers that ask for it.
    #[serde(default)]
    pub transforms: Vec<Transform>,
    pub indicator: IndicatorDefaults,
    #[serde(default)]
    pub columns: BTreeMap<String, IndicatorOverride>,
}

impl DatasetConfig {
    pub fn staleness(&self) -> chrono::Duration {
        staleness_window(self.staleness_hours)
    }

    /// Metadata for a raw column: dataset defaults, then any column override.
    pub fn indicator_metadata(&self, column: &str) -> IndicatorMetadata {
        let defaults = &self.indicator;
        let over = self.columns.get(column).cloned().unwrap_or_default();
        IndicatorMetadata {
            name: over.name.unwrap_or_else(|| column.to_string()),
            area: over.area.unwrap_or(defaults.area),
            frequency: self.frequency,
            currency: over.currency.unwrap_or(defaults.currency),
            inflation_adjustment: over
                .inflation_adjustment
                .unwrap_or(defaults.inflation_adjustment),
            unit: over.unit.unwrap_or_else(|| defaults.unit.clone()),
            seasonal_adjustment: over
                .seasonal_adjustment
                .unwrap_or(defaults.seasonal_adjustment),
            series_type: over.series_type.unwrap_or(defaults.series_type),
            cumulative_periods: over.cumulative_periods.unwrap_or(defaults.cumulative_periods),
        }
    }

    /// Minimal config for tests: local-currency activity flow, one period per row.
    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, frequency: Frequency) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            source: "test".to_string(),
            frequency,
            staleness_hours: default_staleness_hours(),
            revise_rows: RevisionPolicy::default(),
            transforms: Vec::new(),
            indicator: IndicatorDefaults {
                area: Area::Activity,
                currency: Currency::Local,
                inflation_adjustment: InflationAdjustment::None,
                unit: "millions".to_string(),
                seasonal_adjustment: SeasonalAdjustment::None,
                series_type: SeriesType::Flow,
                cumulative_periods: 1,
            },
            columns: BTreeMap::new(),
        }
    }
}

/// Which datasets supply the auxiliary series used by `convert`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryNames {
    pub usd: Option<String>,
    pub constant_prices: Option<String>,
    pub percent_gdp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    auxiliary: AuxiliaryNames,
    #[serde(default)]
    datasets: BTreeMap<String, DatasetConfig>,
}

/// Immutable lookup of dataset names to their configuration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    datasets: BTreeMap<String, DatasetConfig>,
    auxiliary: AuxiliaryNames,
}

impl Registry {
    /// Build from configs; names come from `DatasetConfig::name`.
    pub fn new(configs: Vec<DatasetConfig>, auxiliary: AuxiliaryNames) -> Result<Self, DataError> {
        let mut datasets = BTreeMap::new();
        for config in configs {
            if config.name.trim().is_empty() {
                return Err(DataError::RegistryError("dataset with empty name".into()));
            }
            if datasets.insert(config.name.clone(), config).is_some() {
                return Err(DataError::RegistryError("duplicate dataset name".into()));
            }
        }
        let registry = Self {
            datasets,
            auxiliary,
        };
        registry.check_auxiliary()?;
        Ok(registry)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DataError> {
        let file: RegistryFile =
            toml::from_str(text).map_err(|e| DataError::RegistryError(e.to_string()))?;
        let configs = file
            .datasets
            .into_iter()
            .map(|(name, mut config)| {
                config.name = name;
                config
            })
            .collect();
        Self::new(configs, file.auxiliary)
    }

    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let text = fs::read_to_string(path).map_err(|e| {
            DataError::RegistryError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    fn check_auxiliary(&self) -> Result<(), DataError> {
        let named = [
            ("usd", &self.auxiliary.usd),
            ("constant_prices", &self.auxiliary.constant_prices),
            ("percent_gdp", &self.auxiliary.percent_gdp),
        ];
        for (role, name) in named {
            if let Some(name) = name {
                if !self.datasets.contains_key(name) {
                    return Err(DataError::RegistryError(format!(
                        "auxiliary {role} dataset '{name}' is not registered"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.get(name)
    }

    /// Like [`Registry::get`] but fails with `UnknownDataset`.
    pub fn require(&self, name: &str) -> Result<&DatasetConfig, DataError> {
        self.get(name).ok_or_else(|| DataError::UnknownDataset {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Names whose default area is `area`.
    pub fn names_in_area(&self, area: Area) -> Vec<&str> {
        self.datasets
            .values()
            .filter(|c| c.indicator.area == area)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Dataset supplying the auxiliary series for `flavor`, if configured.
    pub fn auxiliary_for(&self, flavor: ConvertFlavor) -> Option<&str> {
        match flavor {
            ConvertFlavor::Usd => self.auxiliary.usd.as_deref(),
            ConvertFlavor::ConstantPrices => self.auxiliary.constant_prices.as_deref(),
            ConvertFlavor::PercentGdp => self.auxiliary.percent_gdp.as_deref(),
        }
    }
}
