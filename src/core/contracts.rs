//! Raw input data - contracts and ledger entries read by the base aggregations.
//!
//! The dashboard's contract and finance pages own these records; the engine only needs
//! to create them (imports, tests) and read them back for a date window.

use crate::{
    entities::{Contract, LedgerEntry, LedgerKind, contract, ledger_entry},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{Condition, QueryOrder, Set, prelude::*};

/// Records a contract. `end_date`, when present, must not precede `start_date`.
pub async fn create_contract<C>(
    db: &C,
    client: &str,
    status: &str,
    monthly_value: f64,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
) -> Result<contract::Model>
where
    C: ConnectionTrait,
{
    if client.trim().is_empty() {
        return Err(Error::Config {
            message: "Contract client cannot be empty".to_string(),
        });
    }
    if end_date.is_some_and(|end| end < start_date) {
        return Err(Error::Config {
            message: format!("Contract for '{client}' ends before it starts"),
        });
    }

    contract::ActiveModel {
        client: Set(client.trim().to_string()),
        status: Set(status.to_string()),
        monthly_value: Set(monthly_value),
        start_date: Set(start_date),
        end_date: Set(end_date),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Contracts that were in force at some point of `from..=to`.
pub async fn list_contracts_overlapping<C>(
    db: &C,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<contract::Model>>
where
    C: ConnectionTrait,
{
    Contract::find()
        .filter(contract::Column::StartDate.lte(to))
        .filter(
            Condition::any()
                .add(contract::Column::EndDate.is_null())
                .add(contract::Column::EndDate.gte(from)),
        )
        .order_by_asc(contract::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Records a ledger posting.
pub async fn create_ledger_entry<C>(
    db: &C,
    entry_date: NaiveDate,
    amount: f64,
    kind: LedgerKind,
    description: &str,
) -> Result<ledger_entry::Model>
where
    C: ConnectionTrait,
{
    ledger_entry::ActiveModel {
        entry_date: Set(entry_date),
        amount: Set(amount),
        kind: Set(kind),
        description: Set(description.to_string()),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Ledger postings dated within `from..=to`.
pub async fn list_ledger_entries<C>(
    db: &C,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::EntryDate.between(from, to))
        .order_by_asc(ledger_entry::Column::EntryDate)
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
