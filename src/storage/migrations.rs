//! Database migration management.

use sqlx::migrate::Migrator;

use super::pool::BoundedConnectionPool;
use crate::error_handling::DatabaseError;

/// Migrations from `migrations/`, embedded at compile time so the binary
/// does not depend on the source tree at runtime.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies pending migrations through one pooled connection.
///
/// Run once by the orchestrator before any worker starts.
pub async fn run_migrations(pool: &BoundedConnectionPool) -> Result<(), DatabaseError> {
    let mut conn = pool.acquire().await?;
    MIGRATOR.run(&mut *conn).await?;
    pool.release(conn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pool::PoolSettings;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = BoundedConnectionPool::new(PoolSettings::new(dir.path().join("ledger.db")));

        run_migrations(&pool).await.expect("first run");
        run_migrations(&pool).await.expect("second run");

        let mut conn = pool.acquire().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "audit_failure",
                "audit_success",
                "ingest_run_prefixes",
                "ingest_runs"
            ]
        );
    }
}
