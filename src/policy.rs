//! Skip/process decisions per job type.
//!
//! `decide` is the single place that says what resuming a run means. It is a
//! pure function of the job type and what the ledger already knows about a
//! file, and it is consulted before any stage runs.

use clap::ValueEnum;
use strum_macros::EnumIter;

/// Processing mode selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, EnumIter)]
pub enum JobType {
    /// Process new files, skip everything the ledger already knows
    #[value(name = "normal")]
    Normal,
    /// Like `Normal`, but redo files that already succeeded under the same path
    #[value(name = "reprocess")]
    Reprocess,
    /// Re-enrich and re-index succeeded files; process new files normally
    #[value(name = "update_metadata")]
    UpdateMetadata,
    /// Re-enrich and re-index succeeded files; leave new files alone
    #[value(name = "update_metadata_skip_new")]
    UpdateMetadataSkipNew,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Normal => "normal",
            JobType::Reprocess => "reprocess",
            JobType::UpdateMetadata => "update_metadata",
            JobType::UpdateMetadataSkipNew => "update_metadata_skip_new",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the ledger holds for a file discovered at a given base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerState {
    NoRecord,
    /// A success record exists under the base path being processed
    SucceededHere,
    /// A success record exists under a different base path
    SucceededElsewhere { base_path: String },
    /// A failure record exists for this (filename, base path)
    Failed,
}

/// Why a file is not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum SkipReason {
    AlreadyProcessed,
    PreviouslyFailed,
    /// Same filename already succeeded under another base path.
    /// The caller records a `duplicate` failure for it.
    Duplicate,
    /// New file in a mode that only touches known files
    NotEligible,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyProcessed => "already processed",
            SkipReason::PreviouslyFailed => "previously failed",
            SkipReason::Duplicate => "duplicate",
            SkipReason::NotEligible => "not eligible for this job type",
        }
    }
}

/// Outcome of the policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    /// Run every stage: extraction, enrichment, index publish
    FullProcess,
    /// Reuse the stored text; re-run enrichment and index publish only
    MetadataOnly,
}

/// Maps (job type, ledger state) to the action for a file.
///
/// A duplicate under another base path is a skip in every mode. A known
/// failure is never retried automatically.
pub fn decide(job_type: JobType, state: &LedgerState) -> Decision {
    match state {
        LedgerState::SucceededElsewhere { .. } => Decision::Skip(SkipReason::Duplicate),
        LedgerState::Failed => Decision::Skip(SkipReason::PreviouslyFailed),
        LedgerState::NoRecord => match job_type {
            JobType::Normal | JobType::Reprocess | JobType::UpdateMetadata => Decision::FullProcess,
            JobType::UpdateMetadataSkipNew => Decision::Skip(SkipReason::NotEligible),
        },
        LedgerState::SucceededHere => match job_type {
            JobType::Normal => Decision::Skip(SkipReason::AlreadyProcessed),
            JobType::Reprocess => Decision::FullProcess,
            JobType::UpdateMetadata | JobType::UpdateMetadataSkipNew => Decision::MetadataOnly,
        },
    }
}
