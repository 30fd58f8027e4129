//! Seed plan loading from TOML.
//!
//! A seed plan lists metric definitions and monthly targets to upsert. The baseline
//! plan ships inside the binary; other plans can be loaded from disk with
//! [`load_plan`].

use crate::entities::MetricKind;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

const BASELINE_PLAN: &str = include_str!("baseline.toml");

/// Configuration structure representing a whole seed plan file
#[derive(Debug, Deserialize)]
pub struct SeedPlan {
    /// Metric definitions to upsert, keyed by `key`
    #[serde(default)]
    pub metrics: Vec<MetricPlan>,
    /// Monthly targets to upsert
    #[serde(default)]
    pub targets: Vec<TargetPlan>,
}

/// One metric definition in a seed plan
#[derive(Debug, Deserialize, Clone)]
pub struct MetricPlan {
    /// Stable metric key
    pub key: String,
    /// Display title
    pub title: String,
    /// `"base"` or `"derived"`
    pub kind: MetricKind,
    /// Formula source, required for derived metrics
    #[serde(default)]
    pub formula: Option<String>,
    /// Display unit
    pub unit: String,
    /// Defaults to true when omitted
    #[serde(default = "default_active")]
    pub active: bool,
}

/// Targets for one metric over one year
#[derive(Debug, Deserialize, Clone)]
pub struct TargetPlan {
    /// Metric key the targets belong to
    pub metric: String,
    /// Calendar year
    pub year: i32,
    /// Same target for all twelve months
    #[serde(default)]
    pub value: Option<f64>,
    /// One target per month, January first
    #[serde(default)]
    pub values: Option<Vec<f64>>,
}

const fn default_active() -> bool {
    true
}

impl TargetPlan {
    /// Expands the entry into `(month, value)` pairs for all twelve months.
    ///
    /// Exactly one of `value` and `values` must be set, and `values` must hold twelve
    /// finite numbers.
    pub fn monthly_values(&self) -> Result<Vec<(u32, f64)>> {
        let values = match (self.value, &self.values) {
            (Some(value), None) => vec![value; 12],
            (None, Some(values)) if values.len() == 12 => values.clone(),
            (None, Some(values)) => {
                return Err(Error::Config {
                    message: format!(
                        "targets for '{}' in {} list {} values, expected 12",
                        self.metric,
                        self.year,
                        values.len()
                    ),
                });
            }
            _ => {
                return Err(Error::Config {
                    message: format!(
                        "targets for '{}' in {} must set exactly one of `value` or `values`",
                        self.metric, self.year
                    ),
                });
            }
        };

        if let Some(bad) = values.iter().find(|value| !value.is_finite()) {
            return Err(Error::InvalidValue { value: *bad });
        }

        Ok((1..=12).zip(values).collect())
    }
}

/// Parses a seed plan from TOML text.
pub fn parse_plan(contents: &str) -> Result<SeedPlan> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse seed plan: {e}"),
    })
}

/// Loads a seed plan from a TOML file.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a valid plan.
pub fn load_plan<P: AsRef<Path>>(path: P) -> Result<SeedPlan> {
    let path_ref = path.as_ref();
    tracing::debug!("Loading seed plan from {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read seed plan {}: {e}", path_ref.display()),
    })?;
    parse_plan(&contents)
}

/// The baseline plan embedded in the binary.
pub fn baseline_plan() -> Result<SeedPlan> {
    parse_plan(BASELINE_PLAN)
}
