//! Workers: the outer level of fan-out.
//!
//! A worker owns one [`BoundedConnectionPool`] for its whole life and runs up
//! to `threads` file tasks at once over its share of a chunk. The pool is
//! warmed up before the first file so that configuration errors end the
//! worker instead of failing every file.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::progress::PrefixProgress;
use crate::backends::Backends;
use crate::error_handling::{FailureReason, PoolError, ProcessingStats};
use crate::pipeline::{process_file, record_failure, FileOutcome, ObjectKey, PipelineContext};
use crate::policy::JobType;
use crate::storage::{AuditLedger, BoundedConnectionPool, PoolSettings};
use crate::utils::RetryPolicy;

/// Read-only inputs shared by all workers of a prefix.
pub(super) struct WorkerSettings {
    pub backends: Backends,
    pub pool: PoolSettings,
    pub job_type: JobType,
    pub stage_retry: RetryPolicy,
    pub threads: usize,
    pub scratch_dir: PathBuf,
    pub artifact_prefix: String,
    pub stats: Arc<ProcessingStats>,
    pub progress: Arc<PrefixProgress>,
}

/// Processes `keys` and returns once every file has an outcome.
///
/// Only pool construction errors are returned; per-file problems become
/// failure records.
pub(super) async fn run_worker(
    worker_id: usize,
    settings: Arc<WorkerSettings>,
    keys: Vec<String>,
) -> Result<(), PoolError> {
    let pool = Arc::new(BoundedConnectionPool::new(settings.pool.clone()));
    if let Err(e) = pool.warm_up().await {
        error!("Worker {worker_id} could not open its connection pool: {e}");
        return Err(e);
    }
    debug!("Worker {worker_id} started with {} files", keys.len());

    let ctx = Arc::new(PipelineContext {
        backends: settings.backends.clone(),
        ledger: AuditLedger::new(Arc::clone(&pool)),
        job_type: settings.job_type,
        stage_retry: settings.stage_retry,
        scratch_dir: settings.scratch_dir.clone(),
        artifact_prefix: settings.artifact_prefix.clone(),
        stats: Arc::clone(&settings.stats),
    });

    let semaphore = Arc::new(Semaphore::new(settings.threads.max(1)));
    let mut tasks = JoinSet::new();

    for key in keys {
        // Never closed while the worker runs
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let ctx = Arc::clone(&ctx);
        let progress = Arc::clone(&settings.progress);
        tasks.spawn(async move {
            let outcome = run_file_task(&ctx, &key).await;
            progress.record(outcome);
            drop(permit);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            // Panics are caught inside the task, so this is a cancellation
            error!("Worker {worker_id} lost a file task: {e}");
            settings.stats.increment_failure(FailureReason::TaskAborted);
            settings
                .progress
                .record(FileOutcome::Failed(FailureReason::TaskAborted));
        }
    }

    debug!(
        "Worker {worker_id} finished (peak {} of {} connections in use)",
        pool.peak_in_use(),
        pool.max_connections()
    );
    pool.close().await;
    Ok(())
}

/// Runs the pipeline for one key, turning a panic into a `task aborted` failure.
async fn run_file_task(ctx: &PipelineContext, key: &str) -> FileOutcome {
    match AssertUnwindSafe(process_file(ctx, key)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let error = anyhow::anyhow!("file task panicked: {}", panic_message(&panic));
            record_failure(ctx, &ObjectKey::parse(key), FailureReason::TaskAborted, &error).await;
            FileOutcome::Failed(FailureReason::TaskAborted)
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
