//! Monthly target business logic - upserts and reads planned values per metric and month.

use crate::{
    core::period::validate_month,
    entities::{MonthlyTarget, monthly_target},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};

/// Writes the target for `(year, month, metric_key)`, updating the existing row if there
/// is one. The metric must exist (active or not).
pub async fn upsert_monthly_target<C>(
    db: &C,
    year: i32,
    month: u32,
    metric_key: &str,
    target_value: f64,
) -> Result<monthly_target::Model>
where
    C: ConnectionTrait,
{
    validate_month(month)?;
    if !target_value.is_finite() {
        return Err(Error::InvalidValue {
            value: target_value,
        });
    }
    if crate::core::metrics::get_metric_by_key(db, metric_key)
        .await?
        .is_none()
    {
        return Err(Error::MetricNotFound {
            key: metric_key.to_string(),
        });
    }

    let now = Utc::now().naive_utc();
    let existing = MonthlyTarget::find()
        .filter(monthly_target::Column::Year.eq(year))
        .filter(monthly_target::Column::Month.eq(month))
        .filter(monthly_target::Column::MetricKey.eq(metric_key))
        .one(db)
        .await?;

    let stored = if let Some(target) = existing {
        let mut active_model: monthly_target::ActiveModel = target.into();
        active_model.target_value = Set(target_value);
        active_model.updated_at = Set(now);
        active_model.update(db).await?
    } else {
        monthly_target::ActiveModel {
            year: Set(year),
            month: Set(month),
            metric_key: Set(metric_key.to_string()),
            target_value: Set(target_value),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?
    };

    Ok(stored)
}

/// All targets of a year ordered by month then metric key.
pub async fn list_targets<C>(db: &C, year: i32) -> Result<Vec<monthly_target::Model>>
where
    C: ConnectionTrait,
{
    MonthlyTarget::find()
        .filter(monthly_target::Column::Year.eq(year))
        .order_by_asc(monthly_target::Column::Month)
        .order_by_asc(monthly_target::Column::MetricKey)
        .all(db)
        .await
        .map_err(Into::into)
}
