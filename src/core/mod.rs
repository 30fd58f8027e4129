/// Read path over persisted actuals
pub mod actuals;
/// Built-in base aggregations over contracts and ledger entries
pub mod aggregations;
/// Base metric computer and the aggregation registry
pub mod base;
/// Contract status classification store
pub mod contract_status;
/// Raw contract and ledger stores
pub mod contracts;
/// Derived metric evaluator (dependency ordering and per-month evaluation)
pub mod derived;
/// Formula parser and AST
pub mod formula;
/// Metric definition registry
pub mod metrics;
/// Override applier used by the recompute
pub mod override_applier;
/// Manual override store
pub mod overrides;
/// Calendar month arithmetic
pub mod period;
/// Recompute orchestrator
pub mod recompute;
/// Monthly scorecard (actual against target)
pub mod report;
/// Baseline and plan seeding
pub mod seed;
/// Engine bookkeeping in `system_state`
pub mod state;
/// Monthly target store
pub mod targets;
/// In-memory value table used during a recompute
pub mod values;
