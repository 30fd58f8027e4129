//! Override business logic - manual values that supersede computed actuals.
//!
//! Overrides are a strict upsert keyed by `(year, month, metric_key)`: writing a second
//! override for the same period updates the first one. Writing or deleting an override
//! never triggers a recompute; the change is picked up by the next `recompute(year)`.

use crate::{
    core::period::validate_month,
    entities::{MetricOverride, metric_override},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Creates or replaces the override for `(year, month, metric_key)`.
///
/// The metric must exist and be active, the month must be 1-12 and the value finite.
#[instrument(skip(db, note))]
pub async fn create_override(
    db: &DatabaseConnection,
    year: i32,
    month: u32,
    metric_key: &str,
    override_value: f64,
    note: &str,
    updated_by: &str,
) -> Result<metric_override::Model> {
    validate_month(month)?;
    if !override_value.is_finite() {
        return Err(Error::InvalidValue {
            value: override_value,
        });
    }

    let txn = db.begin().await?;

    let metric = crate::core::metrics::get_metric_by_key(&txn, metric_key)
        .await?
        .ok_or_else(|| Error::MetricNotFound {
            key: metric_key.to_string(),
        })?;
    if !metric.active {
        return Err(Error::MetricInactive {
            key: metric.key,
        });
    }

    let now = Utc::now().naive_utc();
    let existing = find_override(&txn, year, month, metric_key).await?;

    let stored = if let Some(current) = existing {
        let mut active_model: metric_override::ActiveModel = current.into();
        active_model.override_value = Set(override_value);
        active_model.note = Set(note.to_string());
        active_model.updated_by = Set(updated_by.to_string());
        active_model.updated_at = Set(now);
        active_model.update(&txn).await?
    } else {
        metric_override::ActiveModel {
            year: Set(year),
            month: Set(month),
            metric_key: Set(metric_key.to_string()),
            override_value: Set(override_value),
            note: Set(note.to_string()),
            updated_by: Set(updated_by.to_string()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?
    };

    txn.commit().await?;
    info!(
        "Override {} set for '{}' {}-{:02} = {}",
        stored.id, stored.metric_key, stored.year, stored.month, stored.override_value
    );
    Ok(stored)
}

/// Finds the override for one metric and month.
pub async fn find_override<C>(
    db: &C,
    year: i32,
    month: u32,
    metric_key: &str,
) -> Result<Option<metric_override::Model>>
where
    C: ConnectionTrait,
{
    MetricOverride::find()
        .filter(metric_override::Column::Year.eq(year))
        .filter(metric_override::Column::Month.eq(month))
        .filter(metric_override::Column::MetricKey.eq(metric_key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Deletes an override. The metric reverts to its computed value on the next recompute.
pub async fn delete_override(db: &DatabaseConnection, id: i64) -> Result<()> {
    let result = MetricOverride::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(Error::OverrideNotFound { id });
    }
    info!("Override {id} deleted");
    Ok(())
}

/// Overrides of one year ordered by month then metric key.
pub async fn list_overrides<C>(db: &C, year: i32) -> Result<Vec<metric_override::Model>>
where
    C: ConnectionTrait,
{
    list_overrides_between(db, year, year).await
}

/// Overrides of every year in `from_year..=to_year`, in chronological order.
pub async fn list_overrides_between<C>(
    db: &C,
    from_year: i32,
    to_year: i32,
) -> Result<Vec<metric_override::Model>>
where
    C: ConnectionTrait,
{
    MetricOverride::find()
        .filter(metric_override::Column::Year.between(from_year, to_year))
        .order_by_asc(metric_override::Column::Year)
        .order_by_asc(metric_override::Column::Month)
        .order_by_asc(metric_override::Column::MetricKey)
        .all(db)
        .await
        .map_err(Into::into)
}
