//! Run metadata.
//!
//! Each invocation is recorded in `ingest_runs` with one `ingest_run_prefixes`
//! row per completed prefix, so past runs can be reviewed after the fact.

use sqlx::Row;

use super::pool::BoundedConnectionPool;
use crate::error_handling::DatabaseError;

/// Metadata for an ingest run, recorded at start.
pub struct RunMetadata<'a> {
    pub run_id: &'a str,
    pub start_time_ms: i64,
    pub version: &'a str,
    pub job_type: &'a str,
}

/// Counters for a completed run or prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunCounters {
    pub total_files: i64,
    pub processed_files: i64,
    pub failed_files: i64,
    pub skipped_files: i64,
    pub elapsed_seconds: f64,
}

/// Inserts or updates run metadata in the `ingest_runs` table.
pub async fn insert_run_metadata(
    pool: &BoundedConnectionPool,
    meta: &RunMetadata<'_>,
) -> Result<(), DatabaseError> {
    let mut conn = pool.acquire().await?;
    sqlx::query(
        "INSERT INTO ingest_runs (run_id, version, job_type, start_time_ms)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(run_id) DO UPDATE SET
             version=excluded.version,
             job_type=excluded.job_type,
             start_time_ms=excluded.start_time_ms",
    )
    .bind(meta.run_id)
    .bind(meta.version)
    .bind(meta.job_type)
    .bind(meta.start_time_ms)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::SqlError)?;
    pool.release(conn);

    Ok(())
}

/// Records the counters of one finished prefix.
pub async fn insert_prefix_stats(
    pool: &BoundedConnectionPool,
    run_id: &str,
    prefix: &str,
    counters: &RunCounters,
) -> Result<(), DatabaseError> {
    let mut conn = pool.acquire().await?;
    sqlx::query(
        "INSERT INTO ingest_run_prefixes (
             run_id, prefix, total_files, processed_files, failed_files, skipped_files, elapsed_seconds
         ) VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(run_id, prefix) DO UPDATE SET
             total_files=excluded.total_files,
             processed_files=excluded.processed_files,
             failed_files=excluded.failed_files,
             skipped_files=excluded.skipped_files,
             elapsed_seconds=excluded.elapsed_seconds",
    )
    .bind(run_id)
    .bind(prefix)
    .bind(counters.total_files)
    .bind(counters.processed_files)
    .bind(counters.failed_files)
    .bind(counters.skipped_files)
    .bind(counters.elapsed_seconds)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::SqlError)?;
    pool.release(conn);

    Ok(())
}

/// Updates run totals when a run completes.
pub async fn update_run_stats(
    pool: &BoundedConnectionPool,
    run_id: &str,
    counters: &RunCounters,
) -> Result<(), DatabaseError> {
    let end_time_ms = chrono::Utc::now().timestamp_millis();

    let mut conn = pool.acquire().await?;
    sqlx::query(
        "UPDATE ingest_runs
         SET end_time_ms = ?, total_files = ?, processed_files = ?, failed_files = ?,
             skipped_files = ?, elapsed_seconds = ?
         WHERE run_id = ?",
    )
    .bind(end_time_ms)
    .bind(counters.total_files)
    .bind(counters.processed_files)
    .bind(counters.failed_files)
    .bind(counters.skipped_files)
    .bind(counters.elapsed_seconds)
    .bind(run_id)
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::SqlError)?;
    pool.release(conn);

    Ok(())
}

/// Summary of a completed run, suitable for displaying run history.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Unique identifier for this run (e.g., "ingest_1765150444953").
    pub run_id: String,
    pub version: String,
    pub job_type: String,
    /// Start time as milliseconds since Unix epoch.
    pub start_time_ms: i64,
    /// End time as milliseconds since Unix epoch.
    pub end_time_ms: i64,
    pub counters: RunCounters,
}

/// Completed runs, most recent first.
pub async fn query_run_history(
    pool: &BoundedConnectionPool,
    limit: Option<u32>,
) -> Result<Vec<RunSummary>, DatabaseError> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query(
        "SELECT run_id, version, job_type, start_time_ms, end_time_ms, total_files,
                processed_files, failed_files, skipped_files, elapsed_seconds
         FROM ingest_runs
         WHERE end_time_ms IS NOT NULL
         ORDER BY start_time_ms DESC
         LIMIT ?",
    )
    // SQLite treats a negative LIMIT as "no limit"
    .bind(limit.map(i64::from).unwrap_or(-1))
    .fetch_all(&mut *conn)
    .await
    .map_err(DatabaseError::SqlError)?;
    pool.release(conn);

    rows.into_iter()
        .map(|row| {
            Ok(RunSummary {
                run_id: row.try_get("run_id")?,
                version: row.try_get("version")?,
                job_type: row.try_get("job_type")?,
                start_time_ms: row.try_get("start_time_ms")?,
                end_time_ms: row.try_get("end_time_ms")?,
                counters: RunCounters {
                    total_files: row.try_get::<Option<i64>, _>("total_files")?.unwrap_or(0),
                    processed_files: row
                        .try_get::<Option<i64>, _>("processed_files")?
                        .unwrap_or(0),
                    failed_files: row.try_get::<Option<i64>, _>("failed_files")?.unwrap_or(0),
                    skipped_files: row.try_get::<Option<i64>, _>("skipped_files")?.unwrap_or(0),
                    elapsed_seconds: row
                        .try_get::<Option<f64>, _>("elapsed_seconds")?
                        .unwrap_or(0.0),
                },
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(DatabaseError::SqlError)
}
