//! Read path over persisted actuals. Reads never trigger a recompute.

use crate::{
    core::period::validate_month,
    entities::{MetricActual, metric_actual},
    errors::Result,
};
use sea_orm::{QueryOrder, prelude::*};

/// Persisted actuals of `year`, optionally narrowed to one month and/or one metric,
/// ordered by month then metric key.
pub async fn get_actuals<C>(
    db: &C,
    year: i32,
    month: Option<u32>,
    metric_key: Option<&str>,
) -> Result<Vec<metric_actual::Model>>
where
    C: ConnectionTrait,
{
    if let Some(month) = month {
        validate_month(month)?;
    }

    let mut query = MetricActual::find().filter(metric_actual::Column::Year.eq(year));
    if let Some(month) = month {
        query = query.filter(metric_actual::Column::Month.eq(month));
    }
    if let Some(key) = metric_key {
        query = query.filter(metric_actual::Column::MetricKey.eq(key));
    }

    query
        .order_by_asc(metric_actual::Column::Month)
        .order_by_asc(metric_actual::Column::MetricKey)
        .all(db)
        .await
        .map_err(Into::into)
}
