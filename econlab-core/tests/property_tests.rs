//! Property tests for pipeline invariants.
//!
//! 1. Select is idempotent and preserves metadata
//! 2. Summing a flow into a coarser frequency preserves the total over complete bins
//! 3. Rebased columns average `base` over the base window
//! 4. A rolling window of one is the identity
//! 5. Every transform leaves its input untouched

use chrono::NaiveDate;
use econlab_core::metadata::{
    Area, Currency, DatasetMetadata, IndicatorMetadata, InflationAdjustment, SeasonalAdjustment,
    SeriesType,
};
use econlab_core::transform::{ResampleOp, RollingOp};
use econlab_core::{Dataset, Frequency};
use proptest::prelude::*;

// ── Strategies ───────────────────────────────────────────────────────

fn meta(name: &str, series_type: SeriesType) -> IndicatorMetadata {
    IndicatorMetadata {
        name: name.to_string(),
        area: Area::Activity,
        frequency: Frequency::Monthly,
        currency: Currency::Local,
        inflation_adjustment: InflationAdjustment::None,
        unit: "millions".to_string(),
        seasonal_adjustment: SeasonalAdjustment::None,
        series_type,
        cumulative_periods: 1,
    }
}

fn month_ends(n: usize) -> Vec<NaiveDate> {
    (0..n)
        .map(|i| {
            let year = 2000 + (i / 12) as i32;
            let month = (i % 12) as u32 + 1;
            Frequency::Monthly.period_end(NaiveDate::from_ymd_opt(year, month, 1).unwrap())
        })
        .collect()
}

fn monthly(series_type: SeriesType, columns: Vec<Vec<f64>>) -> Dataset {
    let n = columns.first().map_or(0, Vec::len);
    let keys: Vec<String> = (0..columns.len()).map(|i| format!("c{i}")).collect();
    let metadata = DatasetMetadata::new(
        keys.iter().map(|k| (k.clone(), meta(k, series_type))).collect(),
    );
    Dataset::new(
        "prop",
        month_ends(n),
        keys.into_iter()
            .zip(columns)
            .map(|(k, v)| (k, v.into_iter().map(Some).collect()))
            .collect(),
        metadata,
    )
    .unwrap()
}

fn arb_values(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1000.0_f64, len)
}

fn arb_dataset(series_type: SeriesType) -> impl Strategy<Value = Dataset> {
    (1usize..4, 1usize..48).prop_flat_map(move |(width, len)| {
        prop::collection::vec(arb_values(len), width)
            .prop_map(move |columns| monthly(series_type, columns))
    })
}

// ── Properties ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn select_is_idempotent(ds in arb_dataset(SeriesType::Stock), pick in 0usize..3) {
        let key = ds.keys()[pick % ds.width()].clone();
        let once = ds.select(&[key.as_str()]).unwrap();
        let twice = once.select(&[key.as_str()]).unwrap();
        prop_assert!(once.equals(&twice));
        prop_assert_eq!(once.metadata().get(&key), ds.metadata().get(&key));
        prop_assert_eq!(once.column(&key), ds.column(&key));
    }

    #[test]
    fn flow_sum_preserves_totals(ds in arb_dataset(SeriesType::Flow)) {
        let quarterly = ds.resample(Frequency::Quarterly, ResampleOp::Sum).unwrap();
        let complete = ds.len() / 3 * 3;
        for key in ds.keys() {
            let before: f64 = ds.column(key).unwrap()[..complete].iter().flatten().sum();
            let after: f64 = quarterly.column(key).unwrap().iter().flatten().sum();
            prop_assert!((before - after).abs() <= 1e-9 * before.abs().max(1.0));
        }
    }

    #[test]
    fn rebase_window_averages_base(
        ds in arb_dataset(SeriesType::Stock),
        from in 0usize..48,
        span in 0usize..12,
        base in 1.0..1000.0_f64,
    ) {
        let from = from % ds.len();
        let to = (from + span).min(ds.len() - 1);
        let start = ds.index()[from];
        let end = ds.index()[to];
        let out = ds.rebase(start, Some(end), base).unwrap();
        for key in out.keys() {
            let window = &out.column(key).unwrap()[from..=to];
            let mean = window.iter().flatten().sum::<f64>() / window.len() as f64;
            prop_assert!((mean - base).abs() <= 1e-9 * base);
        }
    }

    #[test]
    fn rolling_window_of_one_is_identity(ds in arb_dataset(SeriesType::Stock)) {
        let out = ds.rolling(Some(1), RollingOp::Mean).unwrap();
        prop_assert!(out.equals(&ds));
        prop_assert_eq!(out.history().len(), 1);
    }

    #[test]
    fn transforms_never_mutate_input(ds in arb_dataset(SeriesType::Flow)) {
        let before = ds.clone();
        let _ = ds.resample(Frequency::Annual, ResampleOp::Sum);
        let _ = ds.rolling(None, RollingOp::Sum);
        let _ = ds.rebase(ds.index()[0], None, 100.0);
        prop_assert!(ds.equals(&before));
        prop_assert!(ds.history().is_empty());
    }
}
