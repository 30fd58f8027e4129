//! Engine bookkeeping in the `system_state` table.
//!
//! The orchestrator records when each year was last persisted under
//! `last_recompute_{year}`, inside the same transaction that replaces the actuals.

use crate::{
    entities::{SystemState, system_state},
    errors::{Error, Result},
};
use chrono::{NaiveDateTime, Utc};
use sea_orm::{Set, prelude::*};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn last_recompute_key(year: i32) -> String {
    format!("last_recompute_{year}")
}

/// Reads a raw state value.
pub async fn get_state_value<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let state = SystemState::find()
        .filter(system_state::Column::Key.eq(key))
        .one(db)
        .await?;
    Ok(state.map(|s| s.value))
}

/// Inserts or updates a raw state value.
pub async fn set_state_value<C>(db: &C, key: &str, value: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now().naive_utc();
    let existing = SystemState::find()
        .filter(system_state::Column::Key.eq(key))
        .one(db)
        .await?;

    if let Some(state) = existing {
        let mut active_model: system_state::ActiveModel = state.into();
        active_model.value = Set(value.to_string());
        active_model.updated_at = Set(now);
        active_model.update(db).await?;
    } else {
        system_state::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Ok(())
}

/// Records the start time of the run whose actuals were just persisted for `year`.
pub async fn record_last_recompute<C>(db: &C, year: i32, at: NaiveDateTime) -> Result<()>
where
    C: ConnectionTrait,
{
    set_state_value(db, &last_recompute_key(year), &at.format(TIMESTAMP_FORMAT).to_string()).await
}

/// When actuals for `year` were last persisted, if ever.
pub async fn last_recompute_at<C>(db: &C, year: i32) -> Result<Option<NaiveDateTime>>
where
    C: ConnectionTrait,
{
    match get_state_value(db, &last_recompute_key(year)).await? {
        Some(value) => NaiveDateTime::parse_from_str(&value, TIMESTAMP_FORMAT)
            .map(Some)
            .map_err(|e| Error::Config {
                message: format!("Failed to parse last recompute time '{value}': {e}"),
            }),
        None => Ok(None),
    }
}
