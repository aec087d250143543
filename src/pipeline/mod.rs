//! Per-file stage pipeline.
//!
//! A file goes through, in order:
//! 1. extension check
//! 2. ledger state and job policy
//! 3. text extraction (or loading the stored text for metadata-only passes)
//! 4. reference metadata enrichment
//! 5. index publication
//! 6. ledger success write
//!
//! The first stage that fails ends the file and produces exactly one failure
//! record. Nothing in here returns an error to the caller: every outcome is a
//! [`FileOutcome`].

mod context;
mod layout;
mod stages;

use log::{debug, error, warn};

use crate::error_handling::FailureReason;
use crate::policy::{decide, Decision, SkipReason};
use crate::storage::FailureRecord;

pub use context::PipelineContext;
pub use layout::ObjectKey;

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Processed,
    Skipped(SkipReason),
    Failed(FailureReason),
}

/// A stage error tagged with the reason stored in the ledger.
#[derive(Debug)]
pub(crate) struct StageFailure {
    pub reason: FailureReason,
    pub error: anyhow::Error,
}

impl StageFailure {
    pub fn new(reason: FailureReason, error: impl Into<anyhow::Error>) -> Self {
        Self {
            reason,
            error: error.into(),
        }
    }
}

/// Runs every applicable stage for `key` and records the outcome.
pub async fn process_file(ctx: &PipelineContext, key: &str) -> FileOutcome {
    let object = ObjectKey::parse(key);

    match run_stages(ctx, &object).await {
        Ok(outcome) => {
            match outcome {
                FileOutcome::Skipped(reason) => {
                    debug!("Skipped {}: {}", object.key(), reason.as_str());
                    ctx.stats.increment_skip(reason);
                }
                FileOutcome::Processed => debug!("Processed {}", object.key()),
                FileOutcome::Failed(_) => {}
            }
            outcome
        }
        Err(failure) => {
            record_failure(ctx, &object, failure.reason, &failure.error).await;
            FileOutcome::Failed(failure.reason)
        }
    }
}

/// Writes the failure record for a file and counts it.
///
/// Also used by the worker for tasks that panicked.
pub async fn record_failure(
    ctx: &PipelineContext,
    object: &ObjectKey,
    reason: FailureReason,
    error: &anyhow::Error,
) {
    warn!("{} failed ({}): {error:#}", object.key(), reason.as_str());
    ctx.stats.increment_failure(reason);

    let record = FailureRecord::new(
        object.filename(),
        object.base_path(),
        reason,
        Some(format!("{error:#}")),
    );
    match ctx.ledger.record_failure(&record).await {
        Ok(true) => {}
        Ok(false) => debug!(
            "Failure for {} under '{}' was already recorded",
            object.filename(),
            object.base_path()
        ),
        Err(e) => error!(
            "Could not record failure for {}: {e}. It will be retried on the next run",
            object.key()
        ),
    }
}

async fn run_stages(
    ctx: &PipelineContext,
    object: &ObjectKey,
) -> Result<FileOutcome, StageFailure> {
    if !object.is_supported() {
        return Err(StageFailure::new(
            FailureReason::UnsupportedFileType,
            anyhow::anyhow!(
                "extension {:?} is not accepted",
                object.extension().unwrap_or_default()
            ),
        ));
    }

    let state = ctx
        .ledger
        .state(object.filename(), object.base_path())
        .await
        .map_err(|e| StageFailure::new(FailureReason::LedgerUnavailable, e))?;

    match decide(ctx.job_type, &state) {
        Decision::Skip(SkipReason::Duplicate) => Err(stages::duplicate(object, &state)),
        Decision::Skip(reason) => Ok(FileOutcome::Skipped(reason)),
        Decision::FullProcess => stages::full_process(ctx, object).await,
        Decision::MetadataOnly => stages::metadata_only(ctx, object).await,
    }
}
