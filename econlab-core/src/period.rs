//! Sampling frequencies and the period calendar.
//!
//! A period is identified by its end date: month end for monthly data,
//! quarter end for quarterly, December 31 for annual. Daily and irregular
//! data keep the observation date as-is.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sampling period of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Monthly,
    Quarterly,
    Annual,
    Irregular,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Daily,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Annual,
        Frequency::Irregular,
    ];

    /// Coarseness rank; irregular sits below daily.
    fn rank(self) -> u8 {
        match self {
            Frequency::Irregular => 0,
            Frequency::Daily => 1,
            Frequency::Monthly => 2,
            Frequency::Quarterly => 3,
            Frequency::Annual => 4,
        }
    }

    /// True when `target` is strictly coarser than `self`.
    pub fn is_coarser(self, target: Frequency) -> bool {
        target.rank() > self.rank()
    }

    /// Periods per year for calendar frequencies; `None` for daily and irregular data.
    pub fn periods_per_year(self) -> Option<usize> {
        match self {
            Frequency::Monthly => Some(12),
            Frequency::Quarterly => Some(4),
            Frequency::Annual => Some(1),
            Frequency::Daily | Frequency::Irregular => None,
        }
    }

    /// Number of `self` periods contained in one `target` period, when both are calendar frequencies.
    pub fn bin_ratio(self, target: Frequency) -> Option<usize> {
        let from = self.periods_per_year()?;
        let to = target.periods_per_year()?;
        if to == 0 || from % to != 0 {
            return None;
        }
        Some(from / to)
    }

    /// End date of the period containing `date`.
    pub fn period_end(self, date: NaiveDate) -> NaiveDate {
        match self {
            Frequency::Daily | Frequency::Irregular => date,
            Frequency::Monthly => month_end(date.year(), date.month()).unwrap_or(date),
            Frequency::Quarterly => {
                let last_month = ((date.month() - 1) / 3 + 1) * 3;
                month_end(date.year(), last_month).unwrap_or(date)
            }
            Frequency::Annual => NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date),
        }
    }

    /// Parse a raw period label and normalize it to this frequency's period end.
    ///
    /// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY-MM`, `YYYY-Qn`, `YYYYQn` and `YYYY`.
    pub fn parse_period(self, label: &str) -> Option<NaiveDate> {
        let label = label.trim();
        let date = parse_label(label)?;
        Some(self.period_end(date))
    }
}

fn parse_label(label: &str) -> Option<NaiveDate> {
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(label, fmt) {
            return Some(d);
        }
    }
    if let Some((year, quarter)) = label
        .split_once("-Q")
        .or_else(|| label.split_once('Q'))
        .or_else(|| label.split_once("-q"))
    {
        let year: i32 = year.trim().parse().ok()?;
        let quarter: u32 = quarter.trim().parse().ok()?;
        if !(1..=4).contains(&quarter) {
            return None;
        }
        return NaiveDate::from_ymd_opt(year, quarter * 3, 1);
    }
    if let Some((year, month)) = label.split_once('-') {
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, 1);
    }
    if label.len() == 4 {
        let year: i32 = label.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

/// Last calendar day of `year-month`.
pub fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "daily",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annual => "annual",
            Frequency::Irregular => "irregular",
        };
        f.write_str(s)
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "d" => Ok(Frequency::Daily),
            "monthly" | "m" | "me" => Ok(Frequency::Monthly),
            "quarterly" | "q" | "qe" => Ok(Frequency::Quarterly),
            "annual" | "a" | "y" | "ye" => Ok(Frequency::Annual),
            "irregular" => Ok(Frequency::Irregular),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}
