//! Built-in base aggregations over contracts and ledger entries.
//!
//! A contract is *live* on a day when it has started and has not yet ended
//! (`start_date <= day < end_date`). It is *eligible* for MRR-style metrics only when its
//! status is classified active; an end date alone does not make it count. Unknown
//! statuses count as inactive. Churn metrics look at every contract that ended in the
//! month, whatever its status.
//!
//! Sums keep full `f64` precision. Ratios return 0 on an empty denominator.

use crate::{
    core::{contract_status::load_status_map, contracts, period::Period},
    entities::{LedgerKind, contract, ledger_entry},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::ConnectionTrait;
use std::collections::HashMap;

/// Signature shared by every built-in aggregation
pub type AggregationFn = fn(&ReferenceData, Period) -> std::result::Result<f64, String>;

/// Raw data a recompute reads, loaded once per run
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Contracts in force at some point of the loaded window
    pub contracts: Vec<contract::Model>,
    /// Ledger postings dated within the loaded window
    pub ledger_entries: Vec<ledger_entry::Model>,
    /// Contract status classification, `status -> is_active`
    pub statuses: HashMap<String, bool>,
}

impl ReferenceData {
    /// Loads everything needed to aggregate the periods `from..=to`.
    pub async fn load<C>(db: &C, from: Period, to: Period) -> Result<Self>
    where
        C: ConnectionTrait,
    {
        let (start, _) = bounds(from).map_err(|message| Error::Config { message })?;
        let (_, end) = bounds(to).map_err(|message| Error::Config { message })?;

        Ok(Self {
            contracts: contracts::list_contracts_overlapping(db, start, end).await?,
            ledger_entries: contracts::list_ledger_entries(db, start, end).await?,
            statuses: load_status_map(db).await?,
        })
    }

    /// Whether a contract counts towards active metrics while it is live.
    #[must_use]
    pub fn is_eligible(&self, contract: &contract::Model) -> bool {
        self.statuses.get(&contract.status).copied().unwrap_or(false)
    }
}

/// Every aggregation shipped with the engine, keyed by the metric it computes.
#[must_use]
pub fn builtin_aggregations() -> Vec<(&'static str, AggregationFn)> {
    vec![
        ("mrr", mrr),
        ("mrr_start_of_month", mrr_start_of_month),
        ("new_mrr", new_mrr),
        ("churned_mrr", churned_mrr),
        ("active_contracts", active_contracts),
        ("churned_contracts", churned_contracts),
        ("average_ticket", average_ticket),
        ("revenue", revenue),
        ("expenses", expenses),
    ]
}

fn bounds(period: Period) -> std::result::Result<(NaiveDate, NaiveDate), String> {
    match (period.first_day(), period.last_day()) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(format!("period {period} is outside the supported date range")),
    }
}

fn is_live(contract: &contract::Model, day: NaiveDate) -> bool {
    contract.start_date <= day && contract.end_date.is_none_or(|end| end > day)
}

fn ended_in(contract: &contract::Model, period: Period) -> bool {
    contract
        .end_date
        .is_some_and(|end| period.contains(end) && contract.start_date < end)
}

fn sum_contracts<'a, I>(contracts: I) -> std::result::Result<f64, String>
where
    I: IntoIterator<Item = &'a contract::Model>,
{
    contracts.into_iter().try_fold(0.0, |total, contract| {
        if contract.monthly_value.is_finite() {
            Ok(total + contract.monthly_value)
        } else {
            Err(format!(
                "contract {} ({}) has a non-finite monthly value",
                contract.id, contract.client
            ))
        }
    })
}

#[allow(clippy::cast_precision_loss)]
fn count<'a, I>(contracts: I) -> f64
where
    I: IntoIterator<Item = &'a contract::Model>,
{
    contracts.into_iter().count() as f64
}

fn live_eligible(
    data: &ReferenceData,
    day: NaiveDate,
) -> impl Iterator<Item = &contract::Model> {
    data.contracts
        .iter()
        .filter(move |contract| data.is_eligible(contract) && is_live(contract, day))
}

/// Σ monthly value of eligible contracts live on the last day of the month.
pub fn mrr(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    let (_, last) = bounds(period)?;
    sum_contracts(live_eligible(data, last))
}

/// Σ monthly value of eligible contracts live on the first day of the month.
pub fn mrr_start_of_month(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    let (first, _) = bounds(period)?;
    sum_contracts(live_eligible(data, first))
}

/// Σ monthly value of eligible contracts that started during the month.
pub fn new_mrr(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    sum_contracts(
        data.contracts
            .iter()
            .filter(|contract| data.is_eligible(contract) && period.contains(contract.start_date)),
    )
}

/// Σ monthly value of contracts that ended during the month.
pub fn churned_mrr(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    sum_contracts(data.contracts.iter().filter(|contract| ended_in(contract, period)))
}

/// Number of eligible contracts live on the last day of the month.
pub fn active_contracts(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    let (_, last) = bounds(period)?;
    Ok(count(live_eligible(data, last)))
}

/// Number of contracts that ended during the month.
pub fn churned_contracts(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    Ok(count(
        data.contracts
            .iter()
            .filter(|contract| ended_in(contract, period)),
    ))
}

/// MRR per active contract, 0 when there are no active contracts.
pub fn average_ticket(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    let contracts = active_contracts(data, period)?;
    if contracts == 0.0 {
        return Ok(0.0);
    }
    Ok(mrr(data, period)? / contracts)
}

fn sum_ledger(
    data: &ReferenceData,
    period: Period,
    kind: LedgerKind,
) -> std::result::Result<f64, String> {
    data.ledger_entries
        .iter()
        .filter(|entry| entry.kind == kind && period.contains(entry.entry_date))
        .try_fold(0.0, |total, entry| {
            if entry.amount.is_finite() {
                Ok(total + entry.amount)
            } else {
                Err(format!("ledger entry {} has a non-finite amount", entry.id))
            }
        })
}

/// Σ revenue postings dated in the month.
pub fn revenue(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    sum_ledger(data, period, LedgerKind::Revenue)
}

/// Σ expense postings dated in the month.
pub fn expenses(data: &ReferenceData, period: Period) -> std::result::Result<f64, String> {
    sum_ledger(data, period, LedgerKind::Expense)
}
