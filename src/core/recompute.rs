//! Recompute orchestrator - rebuilds every actual of a year in one pass.
//!
//! A run walks `Idle -> ComputingBase -> ApplyingBaseOverrides -> ComputingDerived ->
//! ApplyingDerivedOverrides -> Persisting -> Done`. Configuration, aggregation and
//! dependency problems are collected per metric and month and never stop the run; the
//! values that did compute are still persisted. Persistence replaces the whole year in
//! a single transaction, so readers see either the previous snapshot or the new one.

use crate::{
    core::{
        aggregations::ReferenceData,
        base::{AggregatorRegistry, compute_base_metrics},
        derived::DerivedPlan,
        formula::MAX_LOOKBACK_MONTHS,
        metrics::RegistrySnapshot,
        override_applier::apply_overrides,
        overrides::list_overrides_between,
        period::Period,
        state::record_last_recompute,
        values::ValueTable,
    },
    entities::{MetricActual, MetricKind, ValueSource, metric_actual},
    errors::{Error, Result},
};
use chrono::{NaiveDateTime, Utc};
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Rows per multi-row insert, well under SQLite's bound-parameter limit.
const INSERT_CHUNK_SIZE: usize = 500;

/// Category of a problem found during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecomputeErrorKind {
    /// Bad definition: unparseable formula, unknown reference, cycle, missing aggregation
    Configuration,
    /// An aggregation could not produce a value from raw data
    Aggregation,
    /// A formula input was missing or failed
    Dependency,
    /// The results could not be written; nothing from the run was kept
    Persistence,
}

impl RecomputeErrorKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Aggregation => "aggregation",
            Self::Dependency => "dependency",
            Self::Persistence => "persistence",
        }
    }
}

/// One problem found during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeError {
    /// Error category
    pub kind: RecomputeErrorKind,
    /// Metric concerned, absent for run-wide failures
    pub metric_key: Option<String>,
    /// Month concerned, absent when the problem applies to every month
    pub month: Option<u32>,
    /// Human readable description
    pub message: String,
}

impl RecomputeError {
    /// Creates an error record.
    pub fn new(
        kind: RecomputeErrorKind,
        metric_key: Option<&str>,
        month: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            metric_key: metric_key.map(str::to_string),
            month,
            message: message.into(),
        }
    }
}

impl fmt::Display for RecomputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind.label())?;
        if let Some(key) = &self.metric_key {
            write!(f, " {key}")?;
        }
        if let Some(month) = self.month {
            write!(f, " (month {month})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecomputeStatus {
    /// Everything computed and persisted
    Success,
    /// Persisted, but some metrics or months failed
    Partial,
    /// Nothing was persisted
    Failed,
}

/// Summary returned by [`RecomputeEngine::recompute`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeResult {
    /// True iff `errors` is empty
    pub success: bool,
    /// Success, partial or failed
    pub status: RecomputeStatus,
    /// Year that was recomputed
    pub year: i32,
    /// Base `(month, metric)` pairs computed for the year
    pub base_metrics_computed: usize,
    /// Derived `(month, metric)` pairs computed for the year
    pub derived_metrics_computed: usize,
    /// `(month, metric)` pairs of the year whose value came from an override
    pub overrides_applied: usize,
    /// Everything that went wrong
    pub errors: Vec<RecomputeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ComputingBase,
    ApplyingBaseOverrides,
    ComputingDerived,
    ApplyingDerivedOverrides,
    Persisting,
    Done(RecomputeStatus),
}

impl Phase {
    fn advance(&mut self, next: Self, year: i32) {
        debug!("Recompute {year}: {self:?} -> {next:?}");
        *self = next;
    }
}

/// Runs recomputes against one database, one run per year at a time
#[derive(Debug, Clone)]
pub struct RecomputeEngine {
    db: DatabaseConnection,
    aggregators: Arc<AggregatorRegistry>,
    year_locks: Arc<StdMutex<HashMap<i32, Arc<Mutex<()>>>>>,
}

impl RecomputeEngine {
    /// An engine using the built-in aggregations.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_aggregators(db, AggregatorRegistry::with_builtins())
    }

    /// An engine using a custom set of base aggregations.
    #[must_use]
    pub fn with_aggregators(db: DatabaseConnection, aggregators: AggregatorRegistry) -> Self {
        Self {
            db,
            aggregators: Arc::new(aggregators),
            year_locks: Arc::default(),
        }
    }

    /// The connection the engine reads from and writes to.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn year_lock(&self, year: i32) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .year_locks
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        // Only the map holds an idle lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(locks.entry(year).or_default()))
    }

    /// Recomputes every active metric for the twelve months of `year` and replaces the
    /// persisted actuals of that year.
    ///
    /// Concurrent calls for the same year run one after the other. Returns `Err` only
    /// when the inputs cannot be loaded; every other problem is reported in the result.
    #[instrument(skip(self))]
    pub async fn recompute(&self, year: i32) -> Result<RecomputeResult> {
        let lock = self.year_lock(year)?;
        let _guard = lock.lock().await;

        let run_at = Utc::now().naive_utc();
        let mut phase = Phase::Idle;
        info!("Recomputing metrics for {year}");

        let registry = RegistrySnapshot::load(&self.db).await?;
        let plan = DerivedPlan::build(&registry);

        let first = Period::new(year, 1)?;
        let last = Period::new(year, 12)?;
        let lookback = i32::try_from(plan.lookback_months())
            .unwrap_or(MAX_LOOKBACK_MONTHS)
            .min(MAX_LOOKBACK_MONTHS);
        let window_start = first.offset(-lookback);
        let periods: Vec<Period> = (0..lookback + 12)
            .map(|index| window_start.offset(index))
            .collect();

        let data = ReferenceData::load(&self.db, window_start, last).await?;
        let overrides = list_overrides_between(&self.db, window_start.year(), year).await?;

        let mut table = ValueTable::new();
        if window_start < first {
            let loaded =
                load_prior_derived(&self.db, &registry, &(window_start..=first.offset(-1)), &mut table)
                    .await?;
            debug!("Loaded {loaded} derived actual(s) from before {first}");
        }

        let mut errors = Vec::new();

        phase.advance(Phase::ComputingBase, year);
        let base = compute_base_metrics(
            &registry,
            &self.aggregators,
            &data,
            &periods,
            year,
            &mut table,
        );
        errors.extend(base.errors);

        phase.advance(Phase::ApplyingBaseOverrides, year);
        let mut overrides_applied = apply_overrides(
            &mut table,
            &overrides,
            &registry.keys_of(MetricKind::Base),
            &(window_start..=last),
            year,
        );

        phase.advance(Phase::ComputingDerived, year);
        errors.extend(plan.errors().iter().cloned());
        let derived = plan.evaluate_year(&mut table, year);
        errors.extend(derived.errors);

        phase.advance(Phase::ApplyingDerivedOverrides, year);
        overrides_applied += apply_overrides(
            &mut table,
            &overrides,
            &registry.keys_of(MetricKind::Derived),
            &(first..=last),
            year,
        );

        phase.advance(Phase::Persisting, year);
        let rows = actual_rows(&table, year, run_at);
        let row_count = rows.len();
        let status = match self.persist(year, rows, run_at).await {
            Ok(()) if errors.is_empty() => RecomputeStatus::Success,
            Ok(()) => RecomputeStatus::Partial,
            Err(err) => {
                error!("Persisting actuals for {year} failed, previous snapshot kept: {err}");
                errors.push(RecomputeError::new(
                    RecomputeErrorKind::Persistence,
                    None,
                    None,
                    err.to_string(),
                ));
                RecomputeStatus::Failed
            }
        };
        phase.advance(Phase::Done(status), year);

        let result = RecomputeResult {
            success: errors.is_empty(),
            status,
            year,
            base_metrics_computed: base.computed,
            derived_metrics_computed: derived.computed,
            overrides_applied,
            errors,
        };
        info!(
            "Recompute {year} finished ({:?}): {} base, {} derived, {} overrides, {} row(s), {} error(s)",
            result.status,
            result.base_metrics_computed,
            result.derived_metrics_computed,
            result.overrides_applied,
            row_count,
            result.errors.len()
        );

        Ok(result)
    }

    async fn persist(
        &self,
        year: i32,
        rows: Vec<metric_actual::ActiveModel>,
        run_at: NaiveDateTime,
    ) -> Result<()> {
        let txn = self.db.begin().await?;

        let removed = MetricActual::delete_many()
            .filter(metric_actual::Column::Year.eq(year))
            .exec(&txn)
            .await?;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            MetricActual::insert_many(chunk.iter().cloned())
                .exec_without_returning(&txn)
                .await?;
        }
        record_last_recompute(&txn, year, run_at).await?;

        txn.commit().await?;
        debug!(
            "Replaced {} actual(s) of {year} with {}",
            removed.rows_affected,
            rows.len()
        );
        Ok(())
    }
}

fn actual_rows(
    table: &ValueTable,
    year: i32,
    run_at: NaiveDateTime,
) -> Vec<metric_actual::ActiveModel> {
    table
        .year_slots(year)
        .map(|(period, key, slot)| metric_actual::ActiveModel {
            year: Set(period.year()),
            month: Set(period.month()),
            metric_key: Set(key.to_string()),
            value: Set(slot.value),
            source: Set(slot.source),
            computed_at: Set(run_at),
            ..Default::default()
        })
        .collect()
}

/// Seeds the table with persisted derived actuals of the lookback months, which are
/// never re-evaluated by a later year's run.
///
/// Rows are taken as persisted, so a December override of the previous year is what
/// January formulas see. Within a run, derived overrides are applied only after every
/// month is evaluated.
async fn load_prior_derived<C>(
    db: &C,
    registry: &RegistrySnapshot,
    window: &RangeInclusive<Period>,
    table: &mut ValueTable,
) -> Result<usize>
where
    C: ConnectionTrait,
{
    let rows = MetricActual::find()
        .filter(metric_actual::Column::Year.between(window.start().year(), window.end().year()))
        .all(db)
        .await?;

    let mut loaded = 0;
    for row in rows {
        if registry.kind(&row.metric_key) != Some(MetricKind::Derived) {
            continue;
        }
        let Ok(period) = Period::new(row.year, row.month) else {
            continue;
        };
        if !window.contains(&period) {
            continue;
        }
        match row.source {
            ValueSource::Computed => table.set_computed(&row.metric_key, period, row.value),
            ValueSource::Overridden => table.set_overridden(&row.metric_key, period, row.value),
        }
        loaded += 1;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::actuals::get_actuals;
    use crate::core::contract_status::upsert_contract_status;
    use crate::core::contracts::create_contract;
    use crate::core::overrides::{create_override, delete_override};
    use crate::core::state::last_recompute_at;
    use crate::test_utils::*;

    async fn actual(
        db: &DatabaseConnection,
        year: i32,
        month: u32,
        key: &str,
    ) -> Result<Option<(f64, ValueSource)>> {
        let rows = get_actuals(db, year, Some(month), Some(key)).await?;
        Ok(rows.first().map(|row| (row.value, row.source)))
    }

    async fn snapshot(db: &DatabaseConnection, year: i32) -> Result<Vec<(u32, String, f64, ValueSource)>> {
        let rows = get_actuals(db, year, None, None).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.month, row.metric_key, row.value, row.source))
            .collect())
    }

    #[tokio::test]
    async fn test_manual_override_wins() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_active_contract(&db, "Acme", 100_000.0, date(2025, 6, 1), None).await?;
        let engine = RecomputeEngine::new(db.clone());

        let first = engine.recompute(2026).await?;
        assert!(first.success);
        assert_eq!(first.status, RecomputeStatus::Success);
        assert_eq!(first.base_metrics_computed, 12);
        assert_eq!(actual(&db, 2026, 1, "mrr").await?, Some((100_000.0, ValueSource::Computed)));

        let created = create_override(&db, 2026, 1, "mrr", 120_000.0, "correção manual", "admin").await?;
        let second = engine.recompute(2026).await?;
        assert!(second.overrides_applied >= 1);
        assert_eq!(actual(&db, 2026, 1, "mrr").await?, Some((120_000.0, ValueSource::Overridden)));
        assert_eq!(actual(&db, 2026, 2, "mrr").await?, Some((100_000.0, ValueSource::Computed)));

        delete_override(&db, created.id).await?;
        let third = engine.recompute(2026).await?;
        assert_eq!(third.overrides_applied, 0);
        assert_eq!(actual(&db, 2026, 1, "mrr").await?, Some((100_000.0, ValueSource::Computed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        for key in ["mrr", "mrr_start_of_month", "churned_mrr", "revenue", "expenses"] {
            create_test_metric(&db, key).await?;
        }
        create_derived_metric(&db, "churn_rate", "churned_mrr / mrr_start_of_month").await?;
        create_derived_metric(&db, "profit", "revenue - expenses").await?;
        create_active_contract(&db, "Acme", 4_000.0, date(2025, 1, 1), Some(date(2026, 5, 1))).await?;
        create_active_contract(&db, "Globex", 2_500.5, date(2026, 3, 10), None).await?;
        create_override(&db, 2026, 7, "profit", 1.5, "audit", "admin").await?;

        let engine = RecomputeEngine::new(db.clone());
        let first = engine.recompute(2026).await?;
        let before = snapshot(&db, 2026).await?;
        let second = engine.recompute(2026).await?;
        let after = snapshot(&db, 2026).await?;

        assert_eq!(before, after);
        assert_eq!(before.len(), 7 * 12);
        assert_eq!(first.base_metrics_computed, second.base_metrics_computed);
        assert_eq!(first.derived_metrics_computed, second.derived_metrics_computed);
        assert_eq!(first.overrides_applied, 1);
        assert_eq!(MetricActual::find().count(&db).await?, 7 * 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_denominator_gives_zero_churn() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "churned_mrr").await?;
        create_test_metric(&db, "mrr_start_of_month").await?;
        create_derived_metric(&db, "churn_rate", "churned_mrr / mrr_start_of_month").await?;

        let result = RecomputeEngine::new(db.clone()).recompute(2026).await?;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.derived_metrics_computed, 12);
        assert_eq!(actual(&db, 2026, 4, "churn_rate").await?, Some((0.0, ValueSource::Computed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_base_propagates_to_dependents_only() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "flaky").await?;
        create_test_metric(&db, "mrr").await?;
        create_derived_metric(&db, "double_flaky", "flaky * 2").await?;
        create_derived_metric(&db, "double_mrr", "mrr * 2").await?;

        let mut aggregators = AggregatorRegistry::with_builtins();
        aggregators.register(
            "flaky",
            |_: &ReferenceData, period: Period| -> std::result::Result<f64, String> {
                if period.month() == 3 {
                    Err("upstream export missing".to_string())
                } else {
                    Ok(10.0)
                }
            },
        );
        let result = RecomputeEngine::with_aggregators(db.clone(), aggregators)
            .recompute(2026)
            .await?;

        assert!(!result.success);
        assert_eq!(result.status, RecomputeStatus::Partial);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().any(|e| e.kind == RecomputeErrorKind::Aggregation
            && e.metric_key.as_deref() == Some("flaky")
            && e.month == Some(3)));
        assert!(result.errors.iter().any(|e| e.kind == RecomputeErrorKind::Dependency
            && e.metric_key.as_deref() == Some("double_flaky")
            && e.month == Some(3)));

        assert_eq!(actual(&db, 2026, 3, "double_flaky").await?, None);
        assert_eq!(actual(&db, 2026, 4, "double_flaky").await?, Some((20.0, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 3, "double_mrr").await?, Some((0.0, ValueSource::Computed)));
        assert_eq!(result.base_metrics_computed, 23);
        assert_eq!(result.derived_metrics_computed, 23);
        Ok(())
    }

    #[tokio::test]
    async fn test_override_on_failed_metric_still_persists() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "manual_only").await?;
        create_override(&db, 2026, 2, "manual_only", 42.0, "typed in", "admin").await?;

        let result = RecomputeEngine::with_aggregators(db.clone(), AggregatorRegistry::new())
            .recompute(2026)
            .await?;
        assert_eq!(result.status, RecomputeStatus::Partial);
        assert_eq!(result.errors[0].kind, RecomputeErrorKind::Configuration);
        assert_eq!(result.overrides_applied, 1);
        assert_eq!(actual(&db, 2026, 2, "manual_only").await?, Some((42.0, ValueSource::Overridden)));
        assert_eq!(actual(&db, 2026, 3, "manual_only").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_cycle_is_reported_and_run_terminates() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_derived_metric(&db, "a", "mrr").await?;
        create_derived_metric(&db, "b", "a + 1").await?;
        create_derived_metric(&db, "ok", "mrr + 1").await?;
        // Close the loop after creation, the way an edit would.
        crate::core::metrics::update_metric_definition(&db, derived_input("a", "b + 1")).await?;

        let result = RecomputeEngine::new(db.clone()).recompute(2026).await?;
        assert_eq!(result.status, RecomputeStatus::Partial);
        let configuration: Vec<_> = result
            .errors
            .iter()
            .filter(|e| e.kind == RecomputeErrorKind::Configuration)
            .collect();
        assert_eq!(configuration.len(), 2);
        assert!(configuration.iter().all(|e| e.month.is_none()));
        assert_eq!(result.derived_metrics_computed, 12);
        assert_eq!(actual(&db, 2026, 1, "ok").await?, Some((1.0, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 1, "a").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_override_timing() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_derived_metric(&db, "double", "mrr * 2").await?;
        create_derived_metric(&db, "quad", "double * 2").await?;
        create_active_contract(&db, "Acme", 100_000.0, date(2025, 1, 1), None).await?;

        // Base overrides are visible to formulas.
        create_override(&db, 2026, 1, "mrr", 150_000.0, "late invoice", "admin").await?;
        // Derived overrides land last and are not fed forward.
        create_override(&db, 2026, 2, "double", 1.0, "board figure", "admin").await?;

        let result = RecomputeEngine::new(db.clone()).recompute(2026).await?;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.overrides_applied, 2);

        assert_eq!(actual(&db, 2026, 1, "double").await?, Some((300_000.0, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 1, "quad").await?, Some((600_000.0, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 2, "double").await?, Some((1.0, ValueSource::Overridden)));
        assert_eq!(actual(&db, 2026, 2, "quad").await?, Some((400_000.0, ValueSource::Computed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_previous_snapshot() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_active_contract(&db, "Acme", 1_000.0, date(2025, 1, 1), None).await?;
        let engine = RecomputeEngine::new(db.clone());

        engine.recompute(2026).await?;
        let recorded = last_recompute_at(&db, 2026).await?;
        assert!(recorded.is_some());

        create_active_contract(&db, "Globex", 500.0, date(2025, 1, 1), None).await?;
        db.execute_unprepared(
            "CREATE TRIGGER reject_actuals BEFORE INSERT ON metric_actuals \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .await?;

        let result = engine.recompute(2026).await?;
        assert!(!result.success);
        assert_eq!(result.status, RecomputeStatus::Failed);
        assert!(result.errors.iter().any(|e| e.kind == RecomputeErrorKind::Persistence));

        assert_eq!(actual(&db, 2026, 6, "mrr").await?, Some((1_000.0, ValueSource::Computed)));
        assert_eq!(MetricActual::find().count(&db).await?, 12);
        assert_eq!(last_recompute_at(&db, 2026).await?, recorded);
        Ok(())
    }

    #[tokio::test]
    async fn test_january_reads_december_of_previous_year() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_derived_metric(&db, "mrr_growth", "(mrr - mrr[-1]) / mrr[-1]").await?;
        create_active_contract(&db, "Acme", 100_000.0, date(2025, 1, 1), None).await?;
        create_active_contract(&db, "Globex", 10_000.0, date(2026, 1, 1), None).await?;

        let result = RecomputeEngine::new(db.clone()).recompute(2026).await?;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.base_metrics_computed, 12);
        assert_eq!(actual(&db, 2026, 1, "mrr_growth").await?, Some((0.1, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 2, "mrr_growth").await?, Some((0.0, ValueSource::Computed)));
        // Lookback months feed formulas only.
        assert!(snapshot(&db, 2025).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_derived_prior_reference_uses_persisted_snapshot() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "new_mrr").await?;
        create_derived_metric(&db, "booked", "booked[-1] + new_mrr").await?;
        create_active_contract(&db, "Acme", 50.0, date(2026, 1, 15), None).await?;
        let engine = RecomputeEngine::new(db.clone());

        let without_history = engine.recompute(2026).await?;
        let january = without_history
            .errors
            .iter()
            .find(|e| e.month == Some(1))
            .unwrap();
        assert_eq!(january.kind, RecomputeErrorKind::Dependency);
        assert!(january.message.contains("booked for 2025-12 (missing)"));

        metric_actual::ActiveModel {
            year: Set(2025),
            month: Set(12),
            metric_key: Set("booked".to_string()),
            value: Set(1_000.0),
            source: Set(ValueSource::Computed),
            computed_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(&db)
        .await?;

        let with_history = engine.recompute(2026).await?;
        assert!(with_history.success, "{:?}", with_history.errors);
        assert_eq!(actual(&db, 2026, 1, "booked").await?, Some((1_050.0, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 12, "booked").await?, Some((1_050.0, ValueSource::Computed)));
        assert_eq!(snapshot(&db, 2025).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_prior_year_derived_override_feeds_january() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "new_mrr").await?;
        create_derived_metric(&db, "booked", "booked[-1] + new_mrr").await?;
        for (month, value, source) in [
            (11, 1_000.0, ValueSource::Computed),
            (12, 4_000.0, ValueSource::Overridden),
        ] {
            metric_actual::ActiveModel {
                year: Set(2025),
                month: Set(month),
                metric_key: Set("booked".to_string()),
                value: Set(value),
                source: Set(source),
                computed_at: Set(Utc::now().naive_utc()),
                ..Default::default()
            }
            .insert(&db)
            .await?;
        }

        let result = RecomputeEngine::new(db.clone()).recompute(2026).await?;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(actual(&db, 2026, 1, "booked").await?, Some((4_000.0, ValueSource::Computed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_overflowing_formula_does_not_block_persistence() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_test_metric(&db, "huge").await?;
        create_derived_metric(&db, "scaled", "huge * 10").await?;
        create_derived_metric(&db, "spread", "scaled - scaled").await?;
        create_active_contract(&db, "Acme", 2_000.0, date(2025, 1, 1), None).await?;

        let mut aggregators = AggregatorRegistry::with_builtins();
        aggregators.register(
            "huge",
            |_: &ReferenceData, _: Period| -> std::result::Result<f64, String> { Ok(1e308) },
        );
        let result = RecomputeEngine::with_aggregators(db.clone(), aggregators)
            .recompute(2026)
            .await?;

        assert_eq!(result.status, RecomputeStatus::Partial);
        assert_eq!(result.errors.len(), 24);
        assert!(result.errors.iter().all(|e| e.kind == RecomputeErrorKind::Dependency));
        assert!(result
            .errors
            .iter()
            .any(|e| e.metric_key.as_deref() == Some("scaled") && e.message.contains("non-finite")));
        assert_eq!(actual(&db, 2026, 3, "mrr").await?, Some((2_000.0, ValueSource::Computed)));
        assert_eq!(actual(&db, 2026, 3, "scaled").await?, None);
        assert_eq!(actual(&db, 2026, 3, "spread").await?, None);
        assert_eq!(MetricActual::find().count(&db).await?, 24);
        Ok(())
    }

    #[tokio::test]
    async fn test_suspended_fixed_term_contract_adds_no_mrr() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        upsert_contract_status(&db, "suspenso", false).await?;
        create_contract(&db, "Acme", "suspenso", 5_000.0, date(2025, 1, 1), Some(date(2027, 12, 31))).await?;

        let result = RecomputeEngine::new(db.clone()).recompute(2026).await?;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(actual(&db, 2026, 3, "mrr").await?, Some((0.0, ValueSource::Computed)));
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_year_locks_are_released() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        let engine = RecomputeEngine::new(db.clone());

        for year in 2020..2026 {
            engine.recompute(year).await?;
        }
        let held = engine.year_locks.lock().unwrap();
        assert_eq!(held.len(), 1);
        assert!(held.contains_key(&2025));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_runs_for_one_year_are_serialized() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_metric(&db, "mrr").await?;
        create_derived_metric(&db, "double", "mrr * 2").await?;
        create_active_contract(&db, "Acme", 10.0, date(2025, 1, 1), None).await?;
        let engine = RecomputeEngine::new(db.clone());

        let (first, second) = tokio::join!(engine.recompute(2026), engine.recompute(2026));
        assert!(first?.success);
        assert!(second?.success);
        assert_eq!(MetricActual::find().count(&db).await?, 24);
        Ok(())
    }

    #[test]
    fn test_result_serializes_in_camel_case() {
        let result = RecomputeResult {
            success: false,
            status: RecomputeStatus::Partial,
            year: 2026,
            base_metrics_computed: 1,
            derived_metrics_computed: 2,
            overrides_applied: 3,
            errors: vec![RecomputeError::new(
                RecomputeErrorKind::Dependency,
                Some("ltv"),
                Some(4),
                "required input unavailable",
            )],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "partial");
        assert_eq!(json["baseMetricsComputed"], 1);
        assert_eq!(json["errors"][0]["metricKey"], "ltv");
        assert_eq!(json["errors"][0]["kind"], "dependency");
        assert_eq!(
            result.errors[0].to_string(),
            "[dependency] ltv (month 4): required input unavailable"
        );
    }
}
