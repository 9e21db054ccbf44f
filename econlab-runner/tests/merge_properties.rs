//! Properties of revision merging.

mod common;

use common::*;
use econlab_core::{Frequency, RevisionPolicy};
use econlab_runner::merge_revisions;
use proptest::prelude::*;

proptest! {
    #[test]
    fn nodup_keeps_every_period_and_fresh_values_win(
        cached in prop::collection::vec(1.0f64..1000.0, 1..24),
        fresh in prop::collection::vec(1.0f64..1000.0, 1..12),
        start in 1u32..24,
    ) {
        let reg = registry();
        let old = normalized(&reg, "cpi", &raw_monthly(1, &cached));
        let new = normalized(&reg, "cpi", &raw_monthly(start, &fresh));
        let merged = merge_revisions(&old, &new, RevisionPolicy::NoDuplicates, Frequency::Monthly).unwrap();

        let offset = (start - 1) as usize;
        prop_assert_eq!(merged.len(), cached.len().max(offset + fresh.len()));
        prop_assert!(merged.index().windows(2).all(|w| w[0] < w[1]));
        let col = merged.column("value").unwrap();
        for (i, v) in fresh.iter().enumerate() {
            prop_assert_eq!(col[offset + i], new.column("value").unwrap()[i]);
            prop_assert!(col[offset + i].is_some_and(|x| (x - v).abs() < 1e-9));
        }
        for i in 0..offset.min(cached.len()) {
            prop_assert_eq!(col[i], old.column("value").unwrap()[i]);
        }
    }

    #[test]
    fn trailing_rows_are_replaced_even_when_not_refetched(
        cached in prop::collection::vec(1.0f64..1000.0, 3..24),
        n in 1usize..3,
    ) {
        let reg = registry();
        let old = normalized(&reg, "wages", &raw_monthly(1, &cached));
        let last = cached.len() as u32;
        let new = normalized(&reg, "wages", &raw_monthly(last, &[cached[cached.len() - 1]]));
        let merged = merge_revisions(&old, &new, RevisionPolicy::LastN(n), Frequency::Monthly).unwrap();

        // Dropped cached periods other than the refetched last one disappear.
        let expected = cached.len() - n + 1;
        prop_assert_eq!(merged.len(), expected);
        prop_assert_eq!(merged.last_period(), old.last_period());
    }
}
