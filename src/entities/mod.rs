//! Entity module - Contains all SeaORM entity definitions for the database.
//! Registry tables (definitions, targets, overrides, contract statuses), raw input
//! tables (contracts, ledger entries) and the recompute output table (actuals).

pub mod contract;
pub mod contract_status;
pub mod ledger_entry;
pub mod metric_actual;
pub mod metric_definition;
pub mod metric_override;
pub mod monthly_target;
pub mod system_state;

// Re-export specific types to avoid conflicts
pub use contract::{Column as ContractColumn, Entity as Contract, Model as ContractModel};
pub use contract_status::{
    Column as ContractStatusColumn, Entity as ContractStatus, Model as ContractStatusModel,
};
pub use ledger_entry::{
    Column as LedgerEntryColumn, Entity as LedgerEntry, LedgerKind, Model as LedgerEntryModel,
};
pub use metric_actual::{
    Column as MetricActualColumn, Entity as MetricActual, Model as MetricActualModel, ValueSource,
};
pub use metric_definition::{
    Column as MetricDefinitionColumn, Entity as MetricDefinition, MetricKind,
    Model as MetricDefinitionModel,
};
pub use metric_override::{
    Column as MetricOverrideColumn, Entity as MetricOverride, Model as MetricOverrideModel,
};
pub use monthly_target::{
    Column as MonthlyTargetColumn, Entity as MonthlyTarget, Model as MonthlyTargetModel,
};
pub use system_state::{
    Column as SystemStateColumn, Entity as SystemState, Model as SystemStateModel,
};
