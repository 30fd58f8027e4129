//! Contract status entity - Classifies raw contract statuses as active or not.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Contract status classification model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contract_statuses")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Raw status label as stored on contracts (e.g. `"ativo"`, `"cancelado"`)
    #[sea_orm(unique)]
    pub status: String,
    /// Whether contracts with this status count towards active metrics such as MRR
    pub is_active: bool,
    /// When the classification was last written
    pub updated_at: DateTime,
}

/// `ContractStatus` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
