//! Unified error types for the KPI engine.
//!
//! Store operations fail fast with [`Error`]. Recompute runs are fail-soft and report
//! per-metric problems through [`crate::core::recompute::RecomputeError`] instead.

use crate::core::formula::FormulaError;
use thiserror::Error;

/// Errors raised by registry, store, seed and read-path operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying `SeaORM` failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Invalid configuration, seed plan or input
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description
        message: String,
    },

    /// No metric definition exists for the key
    #[error("Metric not found: {key}")]
    MetricNotFound {
        /// The requested metric key
        key: String,
    },

    /// The metric exists but is switched off
    #[error("Metric '{key}' is inactive")]
    MetricInactive {
        /// The inactive metric key
        key: String,
    },

    /// The metric is still referenced and cannot be deleted
    #[error("Metric '{key}' is still referenced by {referenced_by}")]
    MetricInUse {
        /// The metric that was about to be deleted
        key: String,
        /// What still points at it
        referenced_by: String,
    },

    /// Month outside 1..=12
    #[error("Invalid month {month}: expected a value between 1 and 12")]
    InvalidMonth {
        /// The rejected month
        month: u32,
    },

    /// NaN or infinite value supplied where a number is required
    #[error("Invalid value: {value}")]
    InvalidValue {
        /// The rejected value
        value: f64,
    },

    /// No override with this id
    #[error("Override not found: {id}")]
    OverrideNotFound {
        /// The requested override id
        id: i64,
    },

    /// No contract status row with this id
    #[error("Contract status not found: {id}")]
    ContractStatusNotFound {
        /// The requested status id
        id: i64,
    },

    /// A derived metric formula failed to parse
    #[error("Invalid formula for metric '{key}': {source}")]
    Formula {
        /// The metric owning the formula
        key: String,
        /// Parser diagnostic
        #[source]
        source: FormulaError,
    },

    /// Filesystem failure while reading plans
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output serialization failure
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A recompute run finished but its snapshot was rolled back
    #[error("Recompute of {year} was not persisted: {message}")]
    RecomputeNotPersisted {
        /// The year that was recomputed
        year: i32,
        /// The persistence failure reported by the run
        message: String,
    },

    /// A recompute lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
