//! Metric definition entity - The registry of every KPI the engine knows about.
//!
//! Base metrics are aggregated from raw contract and ledger data; derived metrics carry
//! a formula over other metric keys. Definitions are rarely mutated and are never
//! deleted while a formula or an override still refers to them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether a metric is aggregated from raw data or computed from a formula
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Aggregated directly from raw data by a registered aggregation
    #[sea_orm(string_value = "base")]
    Base,
    /// Evaluated from a formula over other metrics
    #[sea_orm(string_value = "derived")]
    Derived,
}

/// Metric definition database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metric_definitions")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Stable metric key referenced by formulas, targets and overrides (e.g. `"mrr"`)
    #[sea_orm(unique)]
    pub key: String,
    /// Display title shown on dashboards
    pub title: String,
    /// Base or derived
    pub kind: MetricKind,
    /// Formula source, present only for derived metrics (e.g. `"churned_mrr / mrr_start_of_month"`)
    pub formula: Option<String>,
    /// Display unit (e.g. `"BRL"`, `"ratio"`, `"count"`)
    pub unit: String,
    /// Inactive metrics are skipped by recompute and reject new overrides
    pub active: bool,
    /// When the definition was created
    pub created_at: DateTime,
    /// When the definition was last modified
    pub updated_at: DateTime,
}

/// Metric definitions are referenced by key, not by foreign key
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
