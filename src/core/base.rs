//! Base metric computer - one value per `(period, base metric)` from raw data.
//!
//! Each base metric key dispatches to a registered [`BaseAggregation`]. A failing
//! aggregation is recorded against its metric and month and never stops the others.

use crate::{
    core::{
        aggregations::{ReferenceData, builtin_aggregations},
        metrics::RegistrySnapshot,
        period::Period,
        recompute::{RecomputeError, RecomputeErrorKind},
        values::ValueTable,
    },
    entities::MetricKind,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Computes one base metric for one month.
pub trait BaseAggregation: Send + Sync {
    /// Returns the metric value, or a message describing why it cannot be computed.
    fn aggregate(&self, data: &ReferenceData, period: Period) -> Result<f64, String>;
}

impl<F> BaseAggregation for F
where
    F: Fn(&ReferenceData, Period) -> Result<f64, String> + Send + Sync,
{
    fn aggregate(&self, data: &ReferenceData, period: Period) -> Result<f64, String> {
        self(data, period)
    }
}

/// Maps base metric keys to their aggregation
#[derive(Default)]
pub struct AggregatorRegistry {
    aggregations: HashMap<String, Box<dyn BaseAggregation>>,
}

impl AggregatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in aggregation.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (key, aggregation) in builtin_aggregations() {
            registry.register(key, aggregation);
        }
        registry
    }

    /// Registers (or replaces) the aggregation for `key`.
    pub fn register<A>(&mut self, key: impl Into<String>, aggregation: A) -> &mut Self
    where
        A: BaseAggregation + 'static,
    {
        self.aggregations.insert(key.into(), Box::new(aggregation));
        self
    }

    /// The aggregation registered for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&dyn BaseAggregation> {
        self.aggregations.get(key).map(Box::as_ref)
    }
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.aggregations.keys().collect();
        keys.sort();
        f.debug_struct("AggregatorRegistry")
            .field("keys", &keys)
            .finish()
    }
}

/// What the base phase produced besides the values written to the table
#[derive(Debug, Default)]
pub struct BaseOutcome {
    /// Successfully computed `(month, key)` pairs inside the target year
    pub computed: usize,
    /// Configuration and aggregation errors inside the target year
    pub errors: Vec<RecomputeError>,
}

/// Aggregates every active base metric for every period in `periods`.
///
/// Periods outside `year` are lookback months needed by prior-month formula
/// references: their values go into the table, but they are neither counted nor
/// reported.
pub fn compute_base_metrics(
    registry: &RegistrySnapshot,
    aggregators: &AggregatorRegistry,
    data: &ReferenceData,
    periods: &[Period],
    year: i32,
    table: &mut ValueTable,
) -> BaseOutcome {
    let mut outcome = BaseOutcome::default();

    for definition in registry.of_kind(MetricKind::Base) {
        let key = definition.key.as_str();
        let Some(aggregation) = aggregators.get(key) else {
            warn!("No aggregation registered for base metric '{key}'");
            outcome.errors.push(RecomputeError::new(
                RecomputeErrorKind::Configuration,
                Some(key),
                None,
                format!("no aggregation is registered for base metric '{key}'"),
            ));
            for period in periods {
                table.mark_failed(key, *period);
            }
            continue;
        };

        for period in periods {
            let in_year = period.year() == year;
            match aggregation.aggregate(data, *period) {
                Ok(value) if value.is_finite() => {
                    table.set_computed(key, *period, value);
                    if in_year {
                        outcome.computed += 1;
                    }
                }
                Ok(value) => {
                    table.mark_failed(key, *period);
                    if in_year {
                        outcome.errors.push(RecomputeError::new(
                            RecomputeErrorKind::Aggregation,
                            Some(key),
                            Some(period.month()),
                            format!("aggregation produced a non-finite value ({value})"),
                        ));
                    }
                }
                Err(message) => {
                    debug!("Aggregation of '{key}' failed for {period}: {message}");
                    table.mark_failed(key, *period);
                    if in_year {
                        outcome.errors.push(RecomputeError::new(
                            RecomputeErrorKind::Aggregation,
                            Some(key),
                            Some(period.month()),
                            message,
                        ));
                    }
                }
            }
        }
    }

    outcome
}
