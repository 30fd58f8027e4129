//! Database configuration module for the KPI engine.
//!
//! This module handles `SQLite` connection setup and schema creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Period-keyed tables additionally get a
//! composite unique index on `(year, month, metric_key)`, which is what enforces "one
//! target / one override / one actual per metric and month" at row level.

use crate::entities::{
    Contract, ContractStatus, LedgerEntry, MetricActual, MetricActualColumn, MetricDefinition,
    MetricOverride, MetricOverrideColumn, MonthlyTarget, MonthlyTargetColumn, SystemState,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/kpi_engine.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable, falling back to
/// a local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Opens a connection to the configured database and makes sure every table exists.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {database_url}");
    let db = Database::connect(&database_url).await?;
    create_tables(&db).await?;
    info!("Database ready");
    Ok(db)
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

fn period_index<T, C>(name: &str, table: T, year: C, month: C, metric_key: C) -> IndexCreateStatement
where
    T: sea_orm::sea_query::IntoTableRef,
    C: sea_orm::sea_query::IntoIndexColumn,
{
    Index::create()
        .name(name)
        .table(table)
        .col(year)
        .col(month)
        .col(metric_key)
        .unique()
        .if_not_exists()
        .to_owned()
}

/// Creates all tables and unique indexes if they do not exist yet.
///
/// Safe to call on every start-up.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, MetricDefinition).await?;
    create_table(db, &schema, MonthlyTarget).await?;
    create_table(db, &schema, MetricOverride).await?;
    create_table(db, &schema, MetricActual).await?;
    create_table(db, &schema, ContractStatus).await?;
    create_table(db, &schema, Contract).await?;
    create_table(db, &schema, LedgerEntry).await?;
    create_table(db, &schema, SystemState).await?;

    let indexes = [
        period_index(
            "idx_monthly_targets_period",
            MonthlyTarget,
            MonthlyTargetColumn::Year,
            MonthlyTargetColumn::Month,
            MonthlyTargetColumn::MetricKey,
        ),
        period_index(
            "idx_metric_overrides_period",
            MetricOverride,
            MetricOverrideColumn::Year,
            MetricOverrideColumn::Month,
            MetricOverrideColumn::MetricKey,
        ),
        period_index(
            "idx_metric_actuals_period",
            MetricActual,
            MetricActualColumn::Year,
            MetricActualColumn::Month,
            MetricActualColumn::MetricKey,
        ),
    ];
    for index in &indexes {
        db.execute(builder.build(index)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::{
        contract::Model as ContractModel, metric_actual::Model as MetricActualModel,
        metric_definition::Model as MetricDefinitionModel,
        metric_override::Model as MetricOverrideModel,
    };
    use sea_orm::QuerySelect;

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<MetricDefinitionModel> = MetricDefinition::find().limit(1).all(&db).await?;
        let _: Vec<MetricOverrideModel> = MetricOverride::find().limit(1).all(&db).await?;
        let _: Vec<MetricActualModel> = MetricActual::find().limit(1).all(&db).await?;
        let _: Vec<ContractModel> = Contract::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_repeatable() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }

    #[test]
    fn test_default_database_url_is_sqlite() {
        assert!(DEFAULT_DATABASE_URL.starts_with("sqlite://"));
    }
}
