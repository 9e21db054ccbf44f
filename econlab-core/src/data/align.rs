//! Time alignment of series onto a common period index.
//!
//! Periods absent from a source become missing values; nothing is
//! forward-filled.

use crate::period::Frequency;
use crate::transform::ResampleOp;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Sorted union of two period indexes.
pub fn union_index(a: &[NaiveDate], b: &[NaiveDate]) -> Vec<NaiveDate> {
    let all: BTreeSet<NaiveDate> = a.iter().chain(b).copied().collect();
    all.into_iter().collect()
}

/// Values of `(index, values)` looked up at each `target` period.
pub fn align_to_index(
    index: &[NaiveDate],
    values: &[Option<f64>],
    target: &[NaiveDate],
) -> Vec<Option<f64>> {
    let lookup: HashMap<NaiveDate, Option<f64>> =
        index.iter().copied().zip(values.iter().copied()).collect();
    target
        .iter()
        .map(|d| lookup.get(d).copied().flatten())
        .collect()
}

/// Aggregate present observations into `frequency` periods keyed by period end.
///
/// Bins with no present observation are omitted.
pub fn aggregate_by_period(
    index: &[NaiveDate],
    values: &[Option<f64>],
    frequency: Frequency,
    op: ResampleOp,
) -> BTreeMap<NaiveDate, f64> {
    let mut bins: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (date, value) in index.iter().zip(values) {
        if let Some(v) = value {
            bins.entry(frequency.period_end(*date)).or_default().push(*v);
        }
    }
    bins.into_iter()
        .filter_map(|(end, obs)| aggregate(&obs, op).map(|v| (end, v)))
        .collect()
}

/// Aggregate a bin of present values; `None` when empty.
pub(crate) fn aggregate(obs: &[f64], op: ResampleOp) -> Option<f64> {
    match op {
        _ if obs.is_empty() => None,
        ResampleOp::Sum => Some(obs.iter().sum()),
        ResampleOp::Mean => Some(obs.iter().sum::<f64>() / obs.len() as f64),
        ResampleOp::Last => obs.last().copied(),
        ResampleOp::First => obs.first().copied(),
    }
}
