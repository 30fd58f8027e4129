/// Database configuration and connection management
pub mod database;

/// Seed plan loading from TOML (metric definitions and monthly targets)
pub mod plan;
