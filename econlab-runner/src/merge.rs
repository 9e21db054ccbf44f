//! Merging a fresh fetch into the cached dataset.

use econlab_core::{DataError, Dataset, Frequency, RevisionPolicy};
use std::collections::BTreeMap;

/// Combine `cached` and `fresh` under `policy`.
///
/// Periods only in `fresh` are appended. With `NoDuplicates`, every period
/// present in both takes the fresh values. With a trailing-rows policy the
/// last `n` cached periods are dropped first, so the fresh fetch replaces
/// them even where it no longer reports them; any remaining overlap still
/// takes the fresh values. When the column sets or tags differ, `fresh` is
/// returned unchanged.
pub fn merge_revisions(
    cached: &Dataset,
    fresh: &Dataset,
    policy: RevisionPolicy,
    frequency: Frequency,
) -> Result<Dataset, DataError> {
    if cached.keys() != fresh.keys() || cached.metadata() != fresh.metadata() {
        tracing::debug!(
            dataset = cached.name(),
            "column layout changed, taking the fresh fetch as merge result"
        );
        return Ok(fresh.clone());
    }

    let keep = match policy.trailing_rows(frequency) {
        Some(n) => cached.len().saturating_sub(n),
        None => cached.len(),
    };

    // period -> row values; fresh rows are inserted last so they win.
    let mut rows: BTreeMap<_, Vec<Option<f64>>> = BTreeMap::new();
    for (source, limit) in [(cached, keep), (fresh, fresh.len())] {
        for (i, date) in source.index().iter().take(limit).enumerate() {
            let row = source
                .columns()
                .map(|(_, column)| column[i])
                .collect();
            rows.insert(*date, row);
        }
    }

    let index: Vec<_> = rows.keys().copied().collect();
    let columns = cached
        .keys()
        .iter()
        .enumerate()
        .map(|(pos, key)| (key.clone(), rows.values().map(|row| row[pos]).collect()))
        .collect();
    let merged = Dataset::new(cached.name(), index, columns, fresh.metadata().clone())?;
    tracing::debug!(
        dataset = cached.name(),
        policy = %policy_label(policy),
        cached_rows = cached.len(),
        fresh_rows = fresh.len(),
        merged_rows = merged.len(),
        "merged revisions"
    );
    Ok(merged)
}

fn policy_label(policy: RevisionPolicy) -> String {
    match policy {
        RevisionPolicy::NoDuplicates => "nodup".to_string(),
        RevisionPolicy::LastN(n) => format!("last {n}"),
        RevisionPolicy::Automatic => "auto".to_string(),
    }
}
