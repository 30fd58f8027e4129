//! Seed loader - idempotent bulk upsert of metric definitions and monthly targets.
//!
//! Running the same plan twice updates rows in place and reports the same counts. The
//! loader never touches actuals or overrides.

use crate::{
    config::plan::{SeedPlan, baseline_plan},
    core::{
        metrics::{MetricInput, get_metric_by_key, upsert_metric_definition},
        targets::upsert_monthly_target,
    },
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument};

/// Counts reported by a seed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    /// Metric definitions created or updated
    pub metrics_processed: usize,
    /// Monthly targets created or updated
    pub targets_upserted: usize,
}

/// Seeds the plan embedded in the binary.
pub async fn seed_baseline(db: &DatabaseConnection) -> Result<SeedReport> {
    let plan = baseline_plan()?;
    seed_from_plan(db, &plan).await
}

/// Upserts every metric then every target of `plan` in one transaction.
///
/// # Errors
/// Fails, leaving the database untouched, when a definition is invalid or a target
/// names a metric that neither exists nor is part of the plan.
#[instrument(skip(db, plan), fields(metrics = plan.metrics.len(), targets = plan.targets.len()))]
pub async fn seed_from_plan(db: &DatabaseConnection, plan: &SeedPlan) -> Result<SeedReport> {
    let txn = db.begin().await?;
    let mut report = SeedReport {
        metrics_processed: 0,
        targets_upserted: 0,
    };

    for metric in &plan.metrics {
        upsert_metric_definition(
            &txn,
            MetricInput {
                key: metric.key.clone(),
                title: metric.title.clone(),
                kind: metric.kind,
                formula: metric.formula.clone(),
                unit: metric.unit.clone(),
                active: metric.active,
            },
        )
        .await?;
        report.metrics_processed += 1;
    }

    for target in &plan.targets {
        if get_metric_by_key(&txn, &target.metric).await?.is_none() {
            return Err(Error::Config {
                message: format!("targets reference unknown metric '{}'", target.metric),
            });
        }
        for (month, value) in target.monthly_values()? {
            upsert_monthly_target(&txn, target.year, month, &target.metric, value).await?;
            report.targets_upserted += 1;
        }
    }

    txn.commit().await?;
    info!(
        "Seed processed {} metric(s) and {} target(s)",
        report.metrics_processed, report.targets_upserted
    );
    Ok(report)
}
