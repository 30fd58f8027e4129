//! Metric actual entity - The persisted outcome of a recompute.
//!
//! Rows for a year are owned by the recompute orchestrator and are replaced as a whole
//! on every run; nothing else writes to this table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a persisted value came from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Produced by an aggregation or a formula
    #[sea_orm(string_value = "computed")]
    Computed,
    /// Supplied by a manual override
    #[sea_orm(string_value = "overridden")]
    Overridden,
}

/// Metric actual database model, unique per `(year, month, metric_key)`
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metric_actuals")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Calendar year
    pub year: i32,
    /// Calendar month, 1-12
    pub month: u32,
    /// Key of the metric
    pub metric_key: String,
    /// Final value after overrides
    pub value: f64,
    /// Computed or overridden
    pub source: ValueSource,
    /// Start time of the recompute run that produced the row
    pub computed_at: DateTime,
}

/// `MetricActual` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
