//! Monthly scorecard: persisted actual against target for every active metric.
//!
//! Built entirely from stored rows, so a scorecard reflects the last committed
//! recompute.

use crate::{
    core::{actuals::get_actuals, metrics::list_active_metrics, period::validate_month},
    entities::{MonthlyTarget, ValueSource, monthly_target},
    errors::Result,
};
use sea_orm::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

/// One metric on the scorecard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorecardLine {
    /// Metric key
    pub metric_key: String,
    /// Display title
    pub title: String,
    /// Display unit
    pub unit: String,
    /// Planned value, if a target exists
    pub target: Option<f64>,
    /// Persisted value, if the metric computed (or was overridden)
    pub actual: Option<f64>,
    /// Where the actual came from
    pub source: Option<ValueSource>,
    /// `actual / target * 100`, when both exist and the target is not zero
    pub attainment_percent: Option<f64>,
}

/// How much of the target the actual reached, as a percentage.
///
/// A zero target has no meaningful attainment and yields `None`.
#[must_use]
pub fn attainment_percent(actual: f64, target: f64) -> Option<f64> {
    if target == 0.0 {
        return None;
    }
    Some(actual / target * 100.0)
}

/// Builds the scorecard of one month, one line per active metric in key order.
pub async fn monthly_scorecard<C>(db: &C, year: i32, month: u32) -> Result<Vec<ScorecardLine>>
where
    C: ConnectionTrait,
{
    validate_month(month)?;

    let metrics = list_active_metrics(db).await?;
    let actuals: HashMap<String, (f64, ValueSource)> = get_actuals(db, year, Some(month), None)
        .await?
        .into_iter()
        .map(|row| (row.metric_key, (row.value, row.source)))
        .collect();
    let targets: HashMap<String, f64> = MonthlyTarget::find()
        .filter(monthly_target::Column::Year.eq(year))
        .filter(monthly_target::Column::Month.eq(month))
        .all(db)
        .await?
        .into_iter()
        .map(|row| (row.metric_key, row.target_value))
        .collect();

    let lines: Vec<ScorecardLine> = metrics
        .into_iter()
        .map(|metric| {
            let target = targets.get(&metric.key).copied();
            let actual = actuals.get(&metric.key).copied();
            let attainment = match (actual, target) {
                (Some((value, _)), Some(target)) => attainment_percent(value, target),
                _ => None,
            };
            ScorecardLine {
                target,
                actual: actual.map(|(value, _)| value),
                source: actual.map(|(_, source)| source),
                attainment_percent: attainment,
                metric_key: metric.key,
                title: metric.title,
                unit: metric.unit,
            }
        })
        .collect();

    Ok(lines)
}
