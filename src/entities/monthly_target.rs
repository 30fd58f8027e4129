//! Monthly target entity - The planned value of a metric for one month.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Monthly target database model, unique per `(year, month, metric_key)`
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monthly_targets")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Calendar year
    pub year: i32,
    /// Calendar month, 1-12
    pub month: u32,
    /// Key of the metric this target belongs to
    pub metric_key: String,
    /// Planned value
    pub target_value: f64,
    /// When the target was last written
    pub updated_at: DateTime,
}

/// `MonthlyTarget` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
