//! Metric registry business logic - CRUD over metric definitions plus the immutable
//! registry snapshot handed to every recompute.
//!
//! Definitions are validated on write: keys are lowercase identifiers, base metrics
//! carry no formula, derived metrics carry one that parses. Cycles and references to
//! unknown metrics are only detected at recompute time, where they are reported per
//! metric instead of rejecting the edit.

use crate::{
    core::formula::Expr,
    entities::{
        MetricDefinition, MetricKind, MetricOverride, MonthlyTarget, metric_definition,
        metric_override, monthly_target,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// Everything needed to create or fully rewrite a metric definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricInput {
    /// Stable metric key
    pub key: String,
    /// Display title
    pub title: String,
    /// Base or derived
    pub kind: MetricKind,
    /// Formula source, required for derived metrics and forbidden for base ones
    pub formula: Option<String>,
    /// Display unit
    pub unit: String,
    /// Whether recompute should evaluate the metric
    pub active: bool,
}

/// Checks that a metric key is a lowercase identifier usable inside formulas.
pub fn validate_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config {
            message: format!(
                "Invalid metric key '{key}': use lowercase letters, digits and underscores, starting with a letter"
            ),
        })
    }
}

/// Validates key, kind and formula of a definition before it is written.
pub fn validate_definition(input: &MetricInput) -> Result<()> {
    validate_key(&input.key)?;

    if input.title.trim().is_empty() {
        return Err(Error::Config {
            message: format!("Metric '{}' needs a title", input.key),
        });
    }

    match (input.kind, input.formula.as_deref()) {
        (MetricKind::Base, None) => Ok(()),
        (MetricKind::Base, Some(_)) => Err(Error::Config {
            message: format!("Base metric '{}' cannot have a formula", input.key),
        }),
        (MetricKind::Derived, None) => Err(Error::Config {
            message: format!("Derived metric '{}' needs a formula", input.key),
        }),
        (MetricKind::Derived, Some(formula)) => Expr::parse(formula)
            .map(|_| ())
            .map_err(|source| Error::Formula {
                key: input.key.clone(),
                source,
            }),
    }
}

/// Creates a new metric definition.
#[instrument(skip(db, input), fields(key = %input.key))]
pub async fn create_metric_definition<C>(db: &C, input: MetricInput) -> Result<metric_definition::Model>
where
    C: ConnectionTrait,
{
    validate_definition(&input)?;
    let now = Utc::now().naive_utc();

    let definition = metric_definition::ActiveModel {
        key: Set(input.key),
        title: Set(input.title.trim().to_string()),
        kind: Set(input.kind),
        formula: Set(input.formula),
        unit: Set(input.unit),
        active: Set(input.active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let created = definition.insert(db).await?;
    info!("Created {:?} metric '{}'", created.kind, created.key);
    Ok(created)
}

/// Creates the definition, or rewrites title, kind, formula, unit and active flag of
/// the existing definition with the same key. Returns the stored row.
pub async fn upsert_metric_definition<C>(db: &C, input: MetricInput) -> Result<metric_definition::Model>
where
    C: ConnectionTrait,
{
    validate_definition(&input)?;

    let Some(existing) = get_metric_by_key(db, &input.key).await? else {
        return create_metric_definition(db, input).await;
    };

    let mut definition: metric_definition::ActiveModel = existing.into();
    definition.title = Set(input.title.trim().to_string());
    definition.kind = Set(input.kind);
    definition.formula = Set(input.formula);
    definition.unit = Set(input.unit);
    definition.active = Set(input.active);
    definition.updated_at = Set(Utc::now().naive_utc());

    let updated = definition.update(db).await?;
    debug!("Updated metric '{}'", updated.key);
    Ok(updated)
}

/// Rewrites an existing definition. Fails with `MetricNotFound` if the key is unknown.
pub async fn update_metric_definition(
    db: &DatabaseConnection,
    input: MetricInput,
) -> Result<metric_definition::Model> {
    if get_metric_by_key(db, &input.key).await?.is_none() {
        return Err(Error::MetricNotFound { key: input.key });
    }
    upsert_metric_definition(db, input).await
}

/// Switches a metric on or off without touching the rest of its definition.
pub async fn set_metric_active(
    db: &DatabaseConnection,
    key: &str,
    active: bool,
) -> Result<metric_definition::Model> {
    let existing = get_metric_by_key(db, key)
        .await?
        .ok_or_else(|| Error::MetricNotFound {
            key: key.to_string(),
        })?;

    let mut definition: metric_definition::ActiveModel = existing.into();
    definition.active = Set(active);
    definition.updated_at = Set(Utc::now().naive_utc());
    definition.update(db).await.map_err(Into::into)
}

/// Finds a metric definition by key, active or not.
pub async fn get_metric_by_key<C>(db: &C, key: &str) -> Result<Option<metric_definition::Model>>
where
    C: ConnectionTrait,
{
    MetricDefinition::find()
        .filter(metric_definition::Column::Key.eq(key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All definitions ordered by key.
pub async fn list_metrics<C>(db: &C) -> Result<Vec<metric_definition::Model>>
where
    C: ConnectionTrait,
{
    MetricDefinition::find()
        .order_by_asc(metric_definition::Column::Key)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Active definitions ordered by key.
pub async fn list_active_metrics<C>(db: &C) -> Result<Vec<metric_definition::Model>>
where
    C: ConnectionTrait,
{
    MetricDefinition::find()
        .filter(metric_definition::Column::Active.eq(true))
        .order_by_asc(metric_definition::Column::Key)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Deletes a metric definition and its monthly targets.
///
/// Refused with `MetricInUse` while any other formula or any override references the key.
#[instrument(skip(db))]
pub async fn delete_metric_definition(db: &DatabaseConnection, key: &str) -> Result<()> {
    let txn = db.begin().await?;

    let definition = get_metric_by_key(&txn, key)
        .await?
        .ok_or_else(|| Error::MetricNotFound {
            key: key.to_string(),
        })?;

    let dependents: Vec<String> = list_metrics(&txn)
        .await?
        .into_iter()
        .filter(|other| other.key != definition.key)
        .filter(|other| {
            other
                .formula
                .as_deref()
                .and_then(|formula| Expr::parse(formula).ok())
                .is_some_and(|expr| expr.references().iter().any(|r| r.key == definition.key))
        })
        .map(|other| other.key)
        .collect();
    if !dependents.is_empty() {
        return Err(Error::MetricInUse {
            key: definition.key,
            referenced_by: format!("formula of {}", dependents.join(", ")),
        });
    }

    let overrides = MetricOverride::find()
        .filter(metric_override::Column::MetricKey.eq(key))
        .count(&txn)
        .await?;
    if overrides > 0 {
        return Err(Error::MetricInUse {
            key: definition.key,
            referenced_by: format!("{overrides} override(s)"),
        });
    }

    MonthlyTarget::delete_many()
        .filter(monthly_target::Column::MetricKey.eq(key))
        .exec(&txn)
        .await?;
    MetricDefinition::delete_by_id(definition.id)
        .exec(&txn)
        .await?;

    txn.commit().await?;
    info!("Deleted metric '{key}'");
    Ok(())
}

/// Immutable view of the active registry, captured once per recompute so concurrent
/// admin edits cannot change definitions under an in-flight run.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    definitions: BTreeMap<String, metric_definition::Model>,
}

impl RegistrySnapshot {
    /// Captures all active definitions.
    pub async fn load<C>(db: &C) -> Result<Self>
    where
        C: ConnectionTrait,
    {
        Ok(Self::from_definitions(list_active_metrics(db).await?))
    }

    /// Builds a snapshot from already loaded rows, keeping only active ones.
    pub fn from_definitions<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = metric_definition::Model>,
    {
        Self {
            definitions: definitions
                .into_iter()
                .filter(|definition| definition.active)
                .map(|definition| (definition.key.clone(), definition))
                .collect(),
        }
    }

    /// Definition of an active metric.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&metric_definition::Model> {
        self.definitions.get(key)
    }

    /// Whether `key` names an active metric.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    /// Kind of an active metric.
    #[must_use]
    pub fn kind(&self, key: &str) -> Option<MetricKind> {
        self.get(key).map(|definition| definition.kind)
    }

    /// Active definitions of one kind, ordered by key.
    pub fn of_kind(&self, kind: MetricKind) -> impl Iterator<Item = &metric_definition::Model> {
        self.definitions
            .values()
            .filter(move |definition| definition.kind == kind)
    }

    /// Keys of active definitions of one kind.
    #[must_use]
    pub fn keys_of(&self, kind: MetricKind) -> BTreeSet<&str> {
        self.of_kind(kind)
            .map(|definition| definition.key.as_str())
            .collect()
    }

    /// Number of active definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the registry has no active definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
