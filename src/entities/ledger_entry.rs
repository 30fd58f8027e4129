//! Ledger entry entity - A dated revenue or expense posting from finance.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a ledger posting
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// Money in
    #[sea_orm(string_value = "revenue")]
    Revenue,
    /// Money out
    #[sea_orm(string_value = "expense")]
    Expense,
}

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Accounting date of the posting
    pub entry_date: Date,
    /// Posted amount, positive in both directions
    pub amount: f64,
    /// Revenue or expense
    pub kind: LedgerKind,
    /// Free-text description
    pub description: String,
    /// When the row was created
    pub created_at: DateTime,
}

/// `LedgerEntry` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
