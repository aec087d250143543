// storage/mod.rs
// Audit ledger persistence: bounded pool, ledger tables, run metadata

pub mod ledger;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod run;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used items
pub use ledger::AuditLedger;
pub use migrations::run_migrations;
pub use models::{FailureRecord, SuccessRecord, SuccessUpdate, SuccessWrite};
pub use pool::{BoundedConnectionPool, PoolSettings, PooledConnection};
pub use run::{
    insert_prefix_stats, insert_run_metadata, query_run_history, update_run_stats, RunCounters,
    RunMetadata, RunSummary,
};
