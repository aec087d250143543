//! Bounded database connection pool.
//!
//! Wraps a `sqlx` SQLite pool with a counting semaphore so that no more than
//! `max_connections` callers hold a connection at once. Callers beyond that
//! bound queue on the semaphore instead of erroring on pool exhaustion.
//!
//! The underlying pool is created lazily on the first checkout and recreated
//! when it reports itself closed or a checkout fails with a connectivity
//! error. Creation retries connectivity errors forever with a fixed backoff
//! and gives up immediately on configuration errors.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::config::{
    DEFAULT_POOL_MAX_CONNECTIONS, DEFAULT_POOL_MIN_CONNECTIONS, POOL_ACQUIRE_TIMEOUT,
    POOL_CONNECT_RETRY_BACKOFF, SQLITE_BUSY_TIMEOUT,
};
use crate::error_handling::{is_connectivity_error, PoolError};
use crate::utils::{retry_call, RetryPolicy};

/// Settings for one [`BoundedConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// SQLite database file
    pub database_path: PathBuf,
    pub min_connections: u32,
    /// Also the semaphore capacity
    pub max_connections: u32,
    /// Fixed delay between creation attempts after connectivity errors
    pub connect_retry_backoff: Duration,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            min_connections: DEFAULT_POOL_MIN_CONNECTIONS,
            max_connections: DEFAULT_POOL_MAX_CONNECTIONS,
            connect_retry_backoff: POOL_CONNECT_RETRY_BACKOFF,
            acquire_timeout: POOL_ACQUIRE_TIMEOUT,
        }
    }

    pub fn with_bounds(mut self, min_connections: u32, max_connections: u32) -> Self {
        self.min_connections = min_connections.min(max_connections);
        self.max_connections = max_connections.max(1);
        self
    }
}

/// A checked-out connection.
///
/// Holds one semaphore permit for as long as it lives. Dropping it (or
/// passing it to [`BoundedConnectionPool::release`]) returns the connection
/// to the pool first and then frees the permit.
pub struct PooledConnection {
    // Field order matters: the connection goes back before the permit is freed.
    conn: PoolConnection<Sqlite>,
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connection pool whose outstanding checkouts are capped by a semaphore.
///
/// One instance per worker; it is never shared across workers.
pub struct BoundedConnectionPool {
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    /// Current low-level pool tagged with its generation
    inner: Mutex<Option<(u64, SqlitePool)>>,
    generation: AtomicU64,
    in_use: Arc<AtomicUsize>,
    peak_in_use: AtomicUsize,
}

impl BoundedConnectionPool {
    /// Creates the handle. No connection is opened until the first `acquire`.
    pub fn new(settings: PoolSettings) -> Self {
        let capacity = settings.max_connections.max(1) as usize;
        Self {
            settings,
            permits: Arc::new(Semaphore::new(capacity)),
            inner: Mutex::new(None),
            generation: AtomicU64::new(0),
            in_use: Arc::new(AtomicUsize::new(0)),
            peak_in_use: AtomicUsize::new(0),
        }
    }

    /// Waits for a permit, then checks out a connection.
    ///
    /// Never fails because the pool is busy. Connectivity failures recreate
    /// the underlying pool and retry; only configuration-class errors are
    /// returned.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        loop {
            let (generation, pool) = self.current_pool().await?;
            match pool.acquire().await {
                Ok(conn) => {
                    let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    self.peak_in_use.fetch_max(now, Ordering::SeqCst);
                    return Ok(PooledConnection {
                        conn,
                        _permit: permit,
                        in_use: Arc::clone(&self.in_use),
                    });
                }
                Err(e) if is_connectivity_error(&e) => {
                    warn!(
                        "Connection checkout failed ({e}); recreating pool for {}",
                        self.settings.database_path.display()
                    );
                    self.invalidate(generation).await;
                    tokio::time::sleep(self.settings.connect_retry_backoff).await;
                }
                Err(e) => {
                    error!("Connection checkout failed permanently: {e}");
                    return Err(PoolError::Fatal(e));
                }
            }
        }
    }

    /// Returns a connection and its permit. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Opens the underlying pool and round-trips one checkout.
    ///
    /// Workers call this first so that configuration errors end the worker
    /// before any file is touched.
    pub async fn warm_up(&self) -> Result<(), PoolError> {
        let conn = self.acquire().await?;
        self.release(conn);
        Ok(())
    }

    /// Closes the underlying pool. A later `acquire` would recreate it.
    pub async fn close(&self) {
        let current = self.inner.lock().await.take();
        if let Some((_, pool)) = current {
            pool.close().await;
        }
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous checkouts observed.
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use.load(Ordering::SeqCst)
    }

    /// Number of times the underlying pool has been (re)created.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> u32 {
        self.settings.max_connections
    }

    async fn current_pool(&self) -> Result<(u64, SqlitePool), PoolError> {
        let mut guard = self.inner.lock().await;
        if let Some((generation, pool)) = guard.as_ref() {
            if !pool.is_closed() {
                return Ok((*generation, pool.clone()));
            }
            warn!("Database pool reported closed; recreating");
        }

        let pool = self.create_pool_with_retry().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *guard = Some((generation, pool.clone()));
        Ok((generation, pool))
    }

    async fn invalidate(&self, generation: u64) {
        let stale = {
            let mut guard = self.inner.lock().await;
            match guard.as_ref() {
                Some((current, _)) if *current == generation => guard.take(),
                _ => None,
            }
        };
        if let Some((_, pool)) = stale {
            pool.close().await;
        }
    }

    async fn create_pool_with_retry(&self) -> Result<SqlitePool, PoolError> {
        // usize::MAX attempts: connectivity errors are retried until the database comes back
        let policy = RetryPolicy::fixed(usize::MAX, self.settings.connect_retry_backoff);
        let retried = retry_call(
            policy,
            || async {
                let result = self.create_pool().await;
                if let Err(e) = &result {
                    if is_connectivity_error(e) {
                        warn!(
                            "Database unreachable ({e}); retrying in {}s",
                            self.settings.connect_retry_backoff.as_secs_f64()
                        );
                    }
                }
                result
            },
            is_connectivity_error,
        )
        .await;

        match retried.result {
            Ok(pool) => {
                info!(
                    "Database pool ready for {} (max {} connections, {} attempt(s))",
                    self.settings.database_path.display(),
                    self.settings.max_connections,
                    retried.attempts
                );
                Ok(pool)
            }
            Err(e) => {
                error!("Failed to create database pool: {e}");
                Err(PoolError::Fatal(e))
            }
        }
    }

    async fn create_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        debug!(
            "Opening SQLite pool at {}",
            self.settings.database_path.display()
        );
        let options = SqliteConnectOptions::new()
            .filename(&self.settings.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(SQLITE_BUSY_TIMEOUT)
            .foreign_keys(true);

        SqlitePoolOptions::new()
            .min_connections(self.settings.min_connections)
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .connect_with(options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, max: u32) -> PoolSettings {
        let mut settings = PoolSettings::new(dir.path().join("ledger.db")).with_bounds(1, max);
        settings.connect_retry_backoff = Duration::from_millis(10);
        settings
    }

    #[tokio::test]
    async fn test_pool_is_created_lazily() {
        let dir = TempDir::new().unwrap();
        let pool = BoundedConnectionPool::new(settings(&dir, 2));
        assert_eq!(pool.generation(), 0);
        assert!(!dir.path().join("ledger.db").exists());

        pool.warm_up().await.unwrap();
        assert_eq!(pool.generation(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_release_returns_permit() {
        let dir = TempDir::new().unwrap();
        let pool = BoundedConnectionPool::new(settings(&dir, 1));

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 1);
        pool.release(conn);
        assert_eq!(pool.in_use(), 0);

        // With max 1, a second checkout only succeeds if the permit came back
        let conn = tokio::time::timeout(Duration::from_secs(5), pool.acquire())
            .await
            .expect("permit was not returned")
            .unwrap();
        drop(conn);
    }

    #[tokio::test]
    async fn test_acquire_blocks_instead_of_failing_when_exhausted() {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(BoundedConnectionPool::new(settings(&dir, 1)));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished(), "second acquire should be queued");

        drop(held);
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter never woke up")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(pool.peak_in_use(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_is_recreated() {
        let dir = TempDir::new().unwrap();
        let pool = BoundedConnectionPool::new(settings(&dir, 2));
        pool.warm_up().await.unwrap();

        // Simulate the driver closing the pool underneath us
        let (_, inner) = pool.current_pool().await.unwrap();
        inner.close().await;

        pool.warm_up().await.unwrap();
        assert_eq!(pool.generation(), 2);
    }

    #[tokio::test]
    async fn test_unopenable_path_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, 1);
        settings.database_path = dir.path().join("missing-dir").join("ledger.db");
        let pool = BoundedConnectionPool::new(settings);

        let result = tokio::time::timeout(Duration::from_secs(10), pool.acquire())
            .await
            .expect("fatal errors must not be retried forever");
        assert!(matches!(result, Err(PoolError::Fatal(_))));
    }
}
