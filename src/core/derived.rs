//! Derived metric evaluator.
//!
//! Active derived formulas are compiled once per run into a [`DerivedPlan`]: parsed,
//! checked against the registry snapshot and ordered by a topological sort over
//! same-month references. Prior-month references (`mrr[-1]`) add no edge because months
//! are evaluated in ascending order. Metrics on a cycle, or depending on one, are left
//! out of the plan and reported once as configuration errors.

use crate::{
    core::{
        formula::{Expr, MetricRef},
        metrics::RegistrySnapshot,
        period::Period,
        recompute::{RecomputeError, RecomputeErrorKind},
        values::ValueTable,
    },
    entities::MetricKind,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug)]
struct CompiledMetric {
    key: String,
    expr: Expr,
    references: BTreeSet<MetricRef>,
}

/// Evaluation order and configuration errors for one run
#[derive(Debug, Default)]
pub struct DerivedPlan {
    order: Vec<CompiledMetric>,
    errors: Vec<RecomputeError>,
}

/// What derived evaluation produced besides the values written to the table
#[derive(Debug, Default)]
pub struct DerivedOutcome {
    /// Successfully evaluated `(month, key)` pairs
    pub computed: usize,
    /// Dependency errors, one per failed `(month, key)`
    pub errors: Vec<RecomputeError>,
}

impl DerivedPlan {
    /// Compiles every active derived metric of the snapshot.
    #[must_use]
    pub fn build(registry: &RegistrySnapshot) -> Self {
        let mut errors = Vec::new();
        let mut compiled: BTreeMap<String, CompiledMetric> = BTreeMap::new();

        for definition in registry.of_kind(MetricKind::Derived) {
            let key = definition.key.as_str();
            let Some(source) = definition.formula.as_deref() else {
                errors.push(configuration_error(key, "derived metric has no formula".to_string()));
                continue;
            };
            let expr = match Expr::parse(source) {
                Ok(expr) => expr,
                Err(err) => {
                    errors.push(configuration_error(
                        key,
                        format!("formula '{source}' does not parse: {err}"),
                    ));
                    continue;
                }
            };

            let references = expr.references();
            let unknown: BTreeSet<&str> = references
                .iter()
                .filter(|reference| !registry.contains(&reference.key))
                .map(|reference| reference.key.as_str())
                .collect();
            if !unknown.is_empty() {
                errors.push(configuration_error(
                    key,
                    format!(
                        "formula references unknown or inactive metric(s): {}",
                        join(unknown.iter().copied())
                    ),
                ));
                continue;
            }

            compiled.insert(
                key.to_string(),
                CompiledMetric {
                    key: key.to_string(),
                    expr,
                    references,
                },
            );
        }

        let edges: BTreeMap<String, BTreeSet<String>> = compiled
            .values()
            .map(|metric| {
                let dependencies = metric
                    .references
                    .iter()
                    .filter(|reference| {
                        reference.month_offset == 0 && compiled.contains_key(&reference.key)
                    })
                    .map(|reference| reference.key.clone())
                    .collect();
                (metric.key.clone(), dependencies)
            })
            .collect();

        let (ordered, blocked) = topological_order(&edges);
        if !blocked.is_empty() {
            errors.extend(cycle_errors(&edges, &blocked));
        }

        let order = ordered
            .iter()
            .filter_map(|key| compiled.remove(key))
            .collect::<Vec<_>>();
        debug!(
            "Derived plan: {} metric(s) in order, {} configuration error(s)",
            order.len(),
            errors.len()
        );

        Self { order, errors }
    }

    /// Keys in evaluation order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|metric| metric.key.as_str())
    }

    /// Configuration errors found while compiling; they apply to every month.
    #[must_use]
    pub fn errors(&self) -> &[RecomputeError] {
        &self.errors
    }

    /// How many months back any compiled formula reaches.
    #[must_use]
    pub fn lookback_months(&self) -> u32 {
        self.order
            .iter()
            .flat_map(|metric| metric.references.iter())
            .map(|reference| reference.month_offset.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Evaluates every planned metric for one month, in dependency order.
    ///
    /// A metric whose inputs are missing or failed, or whose result is not finite, is
    /// marked failed for the month and reported; the remaining metrics carry on.
    pub fn evaluate_month(&self, table: &mut ValueTable, period: Period) -> DerivedOutcome {
        let mut outcome = DerivedOutcome::default();

        for metric in &self.order {
            let unavailable: Vec<String> = metric
                .references
                .iter()
                .filter_map(|reference| {
                    let at = period.offset(reference.month_offset);
                    if table.value(&reference.key, at).is_some() {
                        return None;
                    }
                    let state = if table.is_failed(&reference.key, at) {
                        "failed"
                    } else {
                        "missing"
                    };
                    Some(format!("{} for {at} ({state})", reference.key))
                })
                .collect();

            let value = if unavailable.is_empty() {
                metric
                    .expr
                    .evaluate(period, &|key: &str, at: Period| table.value(key, at))
            } else {
                None
            };

            match value {
                Some(value) if value.is_finite() => {
                    table.set_computed(&metric.key, period, value);
                    outcome.computed += 1;
                }
                Some(value) => {
                    table.mark_failed(&metric.key, period);
                    outcome.errors.push(RecomputeError::new(
                        RecomputeErrorKind::Dependency,
                        Some(&metric.key),
                        Some(period.month()),
                        format!("formula produced a non-finite value ({value})"),
                    ));
                }
                None => {
                    table.mark_failed(&metric.key, period);
                    outcome.errors.push(RecomputeError::new(
                        RecomputeErrorKind::Dependency,
                        Some(&metric.key),
                        Some(period.month()),
                        format!("required input unavailable: {}", unavailable.join(", ")),
                    ));
                }
            }
        }

        outcome
    }

    /// Evaluates January to December of `year` in order.
    pub fn evaluate_year(&self, table: &mut ValueTable, year: i32) -> DerivedOutcome {
        let mut total = DerivedOutcome::default();
        for period in Period::months_of(year) {
            let month = self.evaluate_month(table, period);
            total.computed += month.computed;
            total.errors.extend(month.errors);
        }
        total
    }
}

fn configuration_error(key: &str, message: String) -> RecomputeError {
    warn!("Derived metric '{key}' skipped: {message}");
    RecomputeError::new(RecomputeErrorKind::Configuration, Some(key), None, message)
}

fn join<'a, I>(keys: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    keys.into_iter().collect::<Vec<_>>().join(", ")
}

/// Kahn's algorithm with a sorted ready set, so the order is deterministic.
/// Returns the ordered keys and the keys that could never be scheduled.
fn topological_order(edges: &BTreeMap<String, BTreeSet<String>>) -> (Vec<String>, BTreeSet<String>) {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (key, dependencies) in edges {
        in_degree.insert(key.as_str(), dependencies.len());
        for dependency in dependencies {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .insert(key.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(key, _)| *key)
        .collect();

    let mut ordered = Vec::with_capacity(edges.len());
    while let Some(key) = ready.pop_first() {
        ordered.push(key.to_string());
        for dependent in dependents.get(key).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    let scheduled: BTreeSet<&str> = ordered.iter().map(String::as_str).collect();
    let blocked = edges
        .keys()
        .filter(|key| !scheduled.contains(key.as_str()))
        .cloned()
        .collect();
    (ordered, blocked)
}

/// Every key reachable from `start` through same-month dependencies.
fn reachable<'a>(edges: &'a BTreeMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = edges
        .get(start)
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();
    while let Some(key) = stack.pop() {
        if seen.insert(key) {
            stack.extend(edges.get(key).into_iter().flatten().map(String::as_str));
        }
    }
    seen
}

fn cycle_errors(
    edges: &BTreeMap<String, BTreeSet<String>>,
    blocked: &BTreeSet<String>,
) -> Vec<RecomputeError> {
    let reach: BTreeMap<&str, BTreeSet<&str>> = blocked
        .iter()
        .map(|key| (key.as_str(), reachable(edges, key)))
        .collect();
    let on_cycle: BTreeSet<&str> = reach
        .iter()
        .filter(|(key, reached)| reached.contains(*key))
        .map(|(key, _)| *key)
        .collect();

    reach
        .iter()
        .map(|(key, reached)| {
            let message = if on_cycle.contains(key) {
                let members = on_cycle
                    .iter()
                    .copied()
                    .filter(|other| reached.contains(other) && reach[other].contains(key));
                format!("formula is part of a dependency cycle: {}", join(members))
            } else {
                let causes = on_cycle.iter().copied().filter(|other| reached.contains(other));
                format!("formula depends on cyclic metric(s): {}", join(causes))
            };
            configuration_error(key, message)
        })
        .collect()
}
