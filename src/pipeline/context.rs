//! Per-worker processing context.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use log::warn;

use crate::backends::Backends;
use crate::error_handling::{is_transient_error, InfoType, ProcessingStats};
use crate::policy::JobType;
use crate::storage::AuditLedger;
use crate::utils::{retry_call, RetryPolicy};

/// Everything a file task needs, shared by the tasks of one worker.
///
/// The ledger wraps the worker's own connection pool; backends and stats are
/// shared across workers.
pub struct PipelineContext {
    pub backends: Backends,
    pub ledger: AuditLedger,
    pub job_type: JobType,
    /// Applied to every external call a stage makes
    pub stage_retry: RetryPolicy,
    pub scratch_dir: PathBuf,
    pub artifact_prefix: String,
    pub stats: Arc<ProcessingStats>,
}

impl PipelineContext {
    /// Runs an external call under the stage retry policy.
    ///
    /// Transient errors are retried in place; the last error is returned once
    /// the bound is reached or a permanent error occurs.
    pub(crate) async fn call_with_retry<T, F, Fut>(
        &self,
        what: &str,
        filename: &str,
        operation: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let retried = retry_call(self.stage_retry, operation, is_transient_error).await;
        if retried.attempts > 1 {
            self.stats.increment_info(InfoType::TransientRetry);
            match &retried.result {
                Ok(_) => warn!(
                    "{what} for {filename} succeeded after {} attempts",
                    retried.attempts
                ),
                Err(e) => warn!(
                    "{what} for {filename} gave up after {} attempts: {e:#}",
                    retried.attempts
                ),
            }
        }
        retried.result
    }
}
