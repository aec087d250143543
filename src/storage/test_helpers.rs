//! Shared test helpers for storage module tests.

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use tempfile::TempDir;

#[cfg(test)]
use crate::storage::{run_migrations, AuditLedger, BoundedConnectionPool, PoolSettings};

/// Creates a pool over a fresh SQLite file with migrations applied.
///
/// A file (not `:memory:`) is used because every pooled connection must see
/// the same database. Keep the returned `TempDir` alive for the test.
#[cfg(test)]
pub async fn create_test_pool() -> (TempDir, BoundedConnectionPool) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let pool = BoundedConnectionPool::new(
        PoolSettings::new(dir.path().join("ledger.db")).with_bounds(1, 4),
    );
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (dir, pool)
}

/// Creates a ledger over a fresh migrated database.
#[cfg(test)]
pub async fn create_test_ledger() -> (TempDir, AuditLedger) {
    let (dir, pool) = create_test_pool().await;
    (dir, AuditLedger::new(Arc::new(pool)))
}
