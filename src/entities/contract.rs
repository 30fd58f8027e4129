//! Contract entity - A recurring-revenue agreement with a client.
//!
//! Contracts are the raw input of the MRR family of base metrics.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Contract database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contracts")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client name
    pub client: String,
    /// Raw status label, classified through the contract status table
    pub status: String,
    /// Recurring value billed every month
    pub monthly_value: f64,
    /// First day the contract is in force
    pub start_date: Date,
    /// Day the contract stopped being in force, if it ended
    pub end_date: Option<Date>,
    /// When the row was created
    pub created_at: DateTime,
}

/// `Contract` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
