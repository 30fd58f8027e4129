//! Shared test utilities for the KPI engine.
//!
//! This module provides common helper functions for setting up test databases
//! and creating registry rows and raw data with sensible defaults.

use crate::{
    core::{
        contract_status::upsert_contract_status,
        contracts::create_contract,
        metrics::{MetricInput, create_metric_definition},
    },
    entities::{MetricKind, contract, metric_definition, metric_override},
    errors::Result,
};
use chrono::{NaiveDate, NaiveDateTime};
use sea_orm::DatabaseConnection;

/// Status used by [`create_active_contract`], classified active.
pub const ACTIVE_STATUS: &str = "ativo";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Shorthand for a calendar date. Panics on an invalid date.
#[allow(clippy::unwrap_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn epoch() -> NaiveDateTime {
    date(2020, 1, 1).and_hms_opt(0, 0, 0).unwrap_or_default()
}

/// Input for an active base metric titled after its key, unit "BRL".
pub fn base_input(key: &str) -> MetricInput {
    MetricInput {
        key: key.to_string(),
        title: key.to_string(),
        kind: MetricKind::Base,
        formula: None,
        unit: "BRL".to_string(),
        active: true,
    }
}

/// Input for an active derived metric, unit "ratio".
pub fn derived_input(key: &str, formula: &str) -> MetricInput {
    MetricInput {
        key: key.to_string(),
        title: key.to_string(),
        kind: MetricKind::Derived,
        formula: Some(formula.to_string()),
        unit: "ratio".to_string(),
        active: true,
    }
}

/// Creates an active base metric with sensible defaults.
pub async fn create_test_metric(
    db: &DatabaseConnection,
    key: &str,
) -> Result<metric_definition::Model> {
    create_metric_definition(db, base_input(key)).await
}

/// Creates an active derived metric with the given formula.
pub async fn create_derived_metric(
    db: &DatabaseConnection,
    key: &str,
    formula: &str,
) -> Result<metric_definition::Model> {
    create_metric_definition(db, derived_input(key, formula)).await
}

/// An in-memory active definition, for code that works on a registry snapshot.
pub fn definition(key: &str, kind: MetricKind, formula: Option<&str>) -> metric_definition::Model {
    metric_definition::Model {
        id: 0,
        key: key.to_string(),
        title: key.to_string(),
        kind,
        formula: formula.map(str::to_string),
        unit: String::new(),
        active: true,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

/// An in-memory override row.
pub fn override_row(
    id: i64,
    year: i32,
    month: u32,
    metric_key: &str,
    override_value: f64,
) -> metric_override::Model {
    metric_override::Model {
        id,
        year,
        month,
        metric_key: metric_key.to_string(),
        override_value,
        note: "test".to_string(),
        updated_by: "tester".to_string(),
        updated_at: epoch(),
    }
}

/// Creates a contract under [`ACTIVE_STATUS`], classifying that status as active first.
pub async fn create_active_contract(
    db: &DatabaseConnection,
    client: &str,
    monthly_value: f64,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
) -> Result<contract::Model> {
    upsert_contract_status(db, ACTIVE_STATUS, true).await?;
    create_contract(db, client, ACTIVE_STATUS, monthly_value, start_date, end_date).await
}
