//! Metric override entity - A manual value that supersedes a computed actual.
//!
//! At most one override exists per `(year, month, metric_key)`; writing a second one
//! for the same period updates the existing row in place.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Override database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metric_overrides")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Calendar year
    pub year: i32,
    /// Calendar month, 1-12
    pub month: u32,
    /// Key of the overridden metric
    pub metric_key: String,
    /// Value that wins over whatever the engine computes
    pub override_value: f64,
    /// Free-text justification (e.g. "correção manual")
    pub note: String,
    /// Who wrote the override
    pub updated_by: String,
    /// When the override was last written
    pub updated_at: DateTime,
}

/// `MetricOverride` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
