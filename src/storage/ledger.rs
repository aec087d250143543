//! Audit ledger: per-file success and failure records.
//!
//! All access goes through the owning worker's [`BoundedConnectionPool`].
//! Writes are idempotent statements (a merging upsert for successes,
//! insert-or-ignore for failures), so concurrent workers can race on the same
//! file without corrupting state. Lock contention on writes is retried through
//! the shared retry helper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::models::{FailureRecord, SuccessRecord, SuccessUpdate, SuccessWrite};
use super::pool::BoundedConnectionPool;
use crate::config::{LEDGER_RETRY_DELAY_MS, LEDGER_RETRY_MAX_ATTEMPTS};
use crate::error_handling::{is_lock_contention, DatabaseError};
use crate::policy::LedgerState;
use crate::utils::{retry_call, RetryPolicy};

const SUCCESS_COLUMNS: &str = "filename, source_path, base_path, extracted_text_path, \
     published_doc_path, is_ocr_applied, is_supplementary_data_a, is_supplementary_data_b, \
     is_third_party_enriched, is_indexed, supplementary_file_missing, last_modified_ms";

const FAILURE_COLUMNS: &str = "filename, base_path, reason, error_message, last_modified_ms";

// Flags are merged column by column: NULL keeps the stored value. The WHERE
// clause turns a conflict under a different base path into a no-op, which
// shows up as zero affected rows.
const UPSERT_SUCCESS: &str = "INSERT INTO audit_success (
        filename, source_path, base_path, extracted_text_path, published_doc_path,
        is_ocr_applied, is_supplementary_data_a, is_supplementary_data_b,
        is_third_party_enriched, is_indexed, supplementary_file_missing, last_modified_ms
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5,
        COALESCE(?6, 0), COALESCE(?7, 0), COALESCE(?8, 0),
        COALESCE(?9, 0), COALESCE(?10, 0), COALESCE(?11, 0), ?12
    )
    ON CONFLICT(filename) DO UPDATE SET
        source_path = excluded.source_path,
        extracted_text_path = COALESCE(?4, audit_success.extracted_text_path),
        published_doc_path = COALESCE(?5, audit_success.published_doc_path),
        is_ocr_applied = COALESCE(?6, audit_success.is_ocr_applied),
        is_supplementary_data_a = COALESCE(?7, audit_success.is_supplementary_data_a),
        is_supplementary_data_b = COALESCE(?8, audit_success.is_supplementary_data_b),
        is_third_party_enriched = COALESCE(?9, audit_success.is_third_party_enriched),
        is_indexed = COALESCE(?10, audit_success.is_indexed),
        supplementary_file_missing = COALESCE(?11, audit_success.supplementary_file_missing),
        last_modified_ms = excluded.last_modified_ms
    WHERE audit_success.base_path = excluded.base_path";

const INSERT_FAILURE: &str = "INSERT INTO audit_failure (
        filename, base_path, reason, error_message, last_modified_ms
    ) VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(filename, base_path) DO NOTHING";

/// Persistence facade over the `audit_success` and `audit_failure` tables.
pub struct AuditLedger {
    pool: Arc<BoundedConnectionPool>,
    write_retry: RetryPolicy,
}

impl AuditLedger {
    pub fn new(pool: Arc<BoundedConnectionPool>) -> Self {
        Self {
            pool,
            write_retry: RetryPolicy::fixed(
                LEDGER_RETRY_MAX_ATTEMPTS,
                Duration::from_millis(LEDGER_RETRY_DELAY_MS),
            ),
        }
    }

    pub fn pool(&self) -> &Arc<BoundedConnectionPool> {
        &self.pool
    }

    /// Returns the base path the filename succeeded under, if any.
    pub async fn lookup(&self, filename: &str) -> Result<Option<String>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let base_path: Option<String> =
            sqlx::query_scalar("SELECT base_path FROM audit_success WHERE filename = ?")
                .bind(filename)
                .fetch_optional(&mut *conn)
                .await?;
        self.pool.release(conn);
        Ok(base_path)
    }

    /// Full success row for a filename.
    pub async fn fetch_success(
        &self,
        filename: &str,
    ) -> Result<Option<SuccessRecord>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {SUCCESS_COLUMNS} FROM audit_success WHERE filename = ?"
        ))
        .bind(filename)
        .fetch_optional(&mut *conn)
        .await?;
        self.pool.release(conn);

        Ok(row.as_ref().map(success_from_row).transpose()?)
    }

    pub async fn fetch_failure(
        &self,
        filename: &str,
        base_path: &str,
    ) -> Result<Option<FailureRecord>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {FAILURE_COLUMNS} FROM audit_failure WHERE filename = ? AND base_path = ?"
        ))
        .bind(filename)
        .bind(base_path)
        .fetch_optional(&mut *conn)
        .await?;
        self.pool.release(conn);

        Ok(row.as_ref().map(failure_from_row).transpose()?)
    }

    /// Folds both tables into the state the job policy decides on.
    ///
    /// A success under the same base path wins over a failure record, and a
    /// failure for this exact pair wins over a success elsewhere.
    pub async fn state(
        &self,
        filename: &str,
        base_path: &str,
    ) -> Result<LedgerState, DatabaseError> {
        let success_base = self.lookup(filename).await?;
        if success_base.as_deref() == Some(base_path) {
            return Ok(LedgerState::SucceededHere);
        }
        if self.fetch_failure(filename, base_path).await?.is_some() {
            return Ok(LedgerState::Failed);
        }
        Ok(match success_base {
            Some(other) => LedgerState::SucceededElsewhere { base_path: other },
            None => LedgerState::NoRecord,
        })
    }

    /// Upserts a success row, merging flags into an existing row for the
    /// same base path.
    ///
    /// When the filename is already recorded under a different base path
    /// nothing is written and [`SuccessWrite::BasePathConflict`] is returned.
    pub async fn record_success(
        &self,
        update: &SuccessUpdate,
    ) -> Result<SuccessWrite, DatabaseError> {
        let retried = retry_call(
            self.write_retry,
            || self.upsert_success(update),
            is_lock_contention,
        )
        .await;
        if retried.attempts > 1 {
            debug!(
                "Success write for {} took {} attempts",
                update.filename, retried.attempts
            );
        }
        retried.result
    }

    /// Inserts a failure row unless one already exists for the pair.
    ///
    /// Returns `true` if this call inserted the row.
    pub async fn record_failure(&self, record: &FailureRecord) -> Result<bool, DatabaseError> {
        let retried = retry_call(
            self.write_retry,
            || self.insert_failure(record),
            is_lock_contention,
        )
        .await;
        if let Err(e) = &retried.result {
            warn!(
                "Failed to record failure for {} under '{}' after {} attempt(s): {e}",
                record.filename, record.base_path, retried.attempts
            );
        }
        retried.result
    }

    /// Success rows whose base path is `prefix` or nested below it, keyed by filename.
    pub async fn list_by_base_path(
        &self,
        prefix: &str,
    ) -> Result<HashMap<String, SuccessRecord>, DatabaseError> {
        let sql = format!("SELECT {SUCCESS_COLUMNS} FROM audit_success {PREFIX_FILTER}");
        let (prefix, pattern) = prefix_binds(prefix);
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql)
            .bind(&prefix)
            .bind(&pattern)
            .fetch_all(&mut *conn)
            .await?;
        self.pool.release(conn);

        rows.iter()
            .map(|row| success_from_row(row).map(|r| (r.filename.clone(), r)))
            .collect::<Result<_, _>>()
            .map_err(DatabaseError::SqlError)
    }

    /// Failure rows whose base path is `prefix` or nested below it, keyed by
    /// `(filename, base_path)`.
    pub async fn list_failures_by_base_path(
        &self,
        prefix: &str,
    ) -> Result<HashMap<(String, String), FailureRecord>, DatabaseError> {
        let sql = format!("SELECT {FAILURE_COLUMNS} FROM audit_failure {PREFIX_FILTER}");
        let (prefix, pattern) = prefix_binds(prefix);
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql)
            .bind(&prefix)
            .bind(&pattern)
            .fetch_all(&mut *conn)
            .await?;
        self.pool.release(conn);

        rows.iter()
            .map(|row| {
                failure_from_row(row).map(|r| ((r.filename.clone(), r.base_path.clone()), r))
            })
            .collect::<Result<_, _>>()
            .map_err(DatabaseError::SqlError)
    }

    async fn upsert_success(&self, update: &SuccessUpdate) -> Result<SuccessWrite, DatabaseError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(UPSERT_SUCCESS)
            .bind(&update.filename)
            .bind(&update.source_path)
            .bind(&update.base_path)
            .bind(&update.extracted_text_path)
            .bind(&update.published_doc_path)
            .bind(update.is_ocr_applied)
            .bind(update.is_supplementary_data_a)
            .bind(update.is_supplementary_data_b)
            .bind(update.is_third_party_enriched)
            .bind(update.is_indexed)
            .bind(update.supplementary_file_missing)
            .bind(now_ms)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(SuccessWrite::Merged);
        }

        let existing: Option<String> =
            sqlx::query_scalar("SELECT base_path FROM audit_success WHERE filename = ?")
                .bind(&update.filename)
                .fetch_optional(&mut *conn)
                .await?;
        self.pool.release(conn);

        match existing {
            Some(existing_base_path) => Ok(SuccessWrite::BasePathConflict { existing_base_path }),
            // Zero rows changed and no row present cannot happen without a concurrent delete
            None => Err(DatabaseError::SqlError(sqlx::Error::RowNotFound)),
        }
    }

    async fn insert_failure(&self, record: &FailureRecord) -> Result<bool, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(INSERT_FAILURE)
            .bind(&record.filename)
            .bind(&record.base_path)
            .bind(&record.reason)
            .bind(&record.error_message)
            .bind(record.last_modified_ms)
            .execute(&mut *conn)
            .await?;
        self.pool.release(conn);
        Ok(result.rows_affected() > 0)
    }
}

/// Matches the exact base path or anything nested below it; an empty prefix
/// matches everything. Binds: `?1` the trimmed prefix, `?2` the LIKE pattern.
const PREFIX_FILTER: &str = "WHERE ?1 = '' OR base_path = ?1 OR base_path LIKE ?2 ESCAPE '\\'";

fn prefix_binds(prefix: &str) -> (String, String) {
    let prefix = prefix.trim_end_matches('/');
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    (prefix.to_string(), format!("{escaped}/%"))
}

fn success_from_row(row: &SqliteRow) -> Result<SuccessRecord, sqlx::Error> {
    Ok(SuccessRecord {
        filename: row.try_get("filename")?,
        source_path: row.try_get("source_path")?,
        base_path: row.try_get("base_path")?,
        extracted_text_path: row.try_get("extracted_text_path")?,
        published_doc_path: row.try_get("published_doc_path")?,
        is_ocr_applied: row.try_get("is_ocr_applied")?,
        is_supplementary_data_a: row.try_get("is_supplementary_data_a")?,
        is_supplementary_data_b: row.try_get("is_supplementary_data_b")?,
        is_third_party_enriched: row.try_get("is_third_party_enriched")?,
        is_indexed: row.try_get("is_indexed")?,
        supplementary_file_missing: row.try_get("supplementary_file_missing")?,
        last_modified_ms: row.try_get("last_modified_ms")?,
    })
}

fn failure_from_row(row: &SqliteRow) -> Result<FailureRecord, sqlx::Error> {
    Ok(FailureRecord {
        filename: row.try_get("filename")?,
        base_path: row.try_get("base_path")?,
        reason: row.try_get("reason")?,
        error_message: row.try_get("error_message")?,
        last_modified_ms: row.try_get("last_modified_ms")?,
    })
}
