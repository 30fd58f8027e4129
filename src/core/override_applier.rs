//! Override applier - writes active overrides over computed values. Override always wins.
//!
//! The orchestrator runs it twice: once over base metrics before derived evaluation, so
//! formulas see corrected inputs, and once over derived metrics after evaluation.

use crate::{
    core::{period::Period, values::ValueTable},
    entities::metric_override,
};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// Applies every override whose metric is in `layer` and whose period lies in `window`.
///
/// Returns how many `(month, metric)` pairs of `year` were overridden; overrides for
/// lookback months outside `year` feed formulas but are not counted.
pub fn apply_overrides(
    table: &mut ValueTable,
    overrides: &[metric_override::Model],
    layer: &BTreeSet<&str>,
    window: &RangeInclusive<Period>,
    year: i32,
) -> usize {
    let mut applied = 0;

    for row in overrides {
        if !layer.contains(row.metric_key.as_str()) {
            continue;
        }
        let Ok(period) = Period::new(row.year, row.month) else {
            warn!("Skipping override {} with invalid month {}", row.id, row.month);
            continue;
        };
        if !window.contains(&period) {
            continue;
        }

        debug!(
            "Override {} sets '{}' {period} to {}",
            row.id, row.metric_key, row.override_value
        );
        table.set_overridden(&row.metric_key, period, row.override_value);
        if period.year() == year {
            applied += 1;
        }
    }

    applied
}
