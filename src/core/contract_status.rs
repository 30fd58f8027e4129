//! Contract status classification - which raw contract statuses count as active.

use crate::{
    entities::{ContractStatus, contract_status},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};
use std::collections::HashMap;
use tracing::info;

/// Creates the classification for `status`, or updates it if the status already exists.
pub async fn upsert_contract_status(
    db: &DatabaseConnection,
    status: &str,
    is_active: bool,
) -> Result<contract_status::Model> {
    let status = status.trim();
    if status.is_empty() {
        return Err(Error::Config {
            message: "Contract status cannot be empty".to_string(),
        });
    }

    let now = Utc::now().naive_utc();
    let existing = ContractStatus::find()
        .filter(contract_status::Column::Status.eq(status))
        .one(db)
        .await?;

    let stored = if let Some(current) = existing {
        let mut active_model: contract_status::ActiveModel = current.into();
        active_model.is_active = Set(is_active);
        active_model.updated_at = Set(now);
        active_model.update(db).await?
    } else {
        contract_status::ActiveModel {
            status: Set(status.to_string()),
            is_active: Set(is_active),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?
    };

    info!(
        "Contract status '{}' classified as {}",
        stored.status,
        if stored.is_active { "active" } else { "inactive" }
    );
    Ok(stored)
}

/// Removes a classification. Contracts with that status count as inactive afterwards.
pub async fn delete_contract_status(db: &DatabaseConnection, id: i64) -> Result<()> {
    let result = ContractStatus::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(Error::ContractStatusNotFound { id });
    }
    Ok(())
}

/// All classifications ordered by status.
pub async fn list_contract_statuses<C>(db: &C) -> Result<Vec<contract_status::Model>>
where
    C: ConnectionTrait,
{
    ContractStatus::find()
        .order_by_asc(contract_status::Column::Status)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Classification as a lookup map of `status -> is_active`.
pub async fn load_status_map<C>(db: &C) -> Result<HashMap<String, bool>>
where
    C: ConnectionTrait,
{
    Ok(list_contract_statuses(db)
        .await?
        .into_iter()
        .map(|row| (row.status, row.is_active))
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_upsert_contract_status() -> Result<()> {
        let db = setup_test_db().await?;

        let created = upsert_contract_status(&db, "ativo", true).await?;
        let updated = upsert_contract_status(&db, " ativo ", false).await?;
        assert_eq!(created.id, updated.id);
        assert!(!updated.is_active);

        let result = upsert_contract_status(&db, "   ", true).await;
        assert!(matches!(result.unwrap_err(), Error::Config { message: _ }));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_map_and_delete() -> Result<()> {
        let db = setup_test_db().await?;
        let ativo = upsert_contract_status(&db, "ativo", true).await?;
        upsert_contract_status(&db, "cancelado", false).await?;

        let map = load_status_map(&db).await?;
        assert_eq!(map.get("ativo"), Some(&true));
        assert_eq!(map.get("cancelado"), Some(&false));

        delete_contract_status(&db, ativo.id).await?;
        let statuses = list_contract_statuses(&db).await?;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, "cancelado");

        let result = delete_contract_status(&db, ativo.id).await;
        assert!(matches!(result.unwrap_err(), Error::ContractStatusNotFound { id: _ }));
        Ok(())
    }
}
