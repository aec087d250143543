//! doc_ingest library: audit-gated concurrent document ingestion
//!
//! Files under one or more storage prefixes are type-checked, text-extracted
//! (with OCR when there is no usable text layer), enriched from reference
//! datasets and published to a search index. Every outcome lands in a SQLite
//! audit ledger, which makes runs resumable: a file that already succeeded
//! or failed is not touched again unless the job type says so.
//!
//! # Example
//!
//! ```no_run
//! use doc_ingest::{run_ingest, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     storage_root: "/data/scans".into(),
//!     prefixes: vec!["2024/batch-01".to_string()],
//!     ..Default::default()
//! };
//!
//! let report = run_ingest(config).await?;
//! println!("{} files: {} processed, {} failed, {} skipped",
//!          report.total_files, report.processed, report.failed, report.skipped);
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Full-process runs with the default
//! extractor need `pdftotext`, `pdftoppm` and `tesseract` on `PATH`.

pub mod backends;
pub mod config;
pub mod error_handling;
pub mod initialization;
mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod storage;
mod utils;

use std::process::ExitCode;

use log::error;

// Re-export public API
pub use config::{Config, FailOn, IndexBackend, LogFormat, LogLevel, Opt};
pub use orchestrator::{run_ingest, run_with_backends, IngestReport, PrefixReport};
pub use policy::{decide, Decision, JobType, LedgerState, SkipReason};
pub use storage::{query_run_history, run_migrations, RunSummary};
pub use utils::{retry_call, Retried, RetryPolicy};

/// Exit code for a completed run under the `--fail-on` policy.
///
/// - `0`: success, or failures within the policy
/// - `2`: failures exceed the policy
/// - `3`: `pct>` policy but nothing was listed, so no percentage exists
pub fn evaluate_exit_code(fail_on: &FailOn, pct_threshold: u8, report: &IngestReport) -> u8 {
    match fail_on {
        FailOn::Never => 0,
        FailOn::AnyFailure => {
            if report.failed > 0 {
                2
            } else {
                0
            }
        }
        FailOn::PctGreaterThan => {
            if report.total_files == 0 {
                return 3;
            }
            if report.failure_percentage() > f64::from(pct_threshold) {
                2
            } else {
                0
            }
        }
    }
}

/// Runs an ingest and maps the outcome to a process exit code.
///
/// Prints a one-line summary on success. Fatal errors are logged and give
/// exit code 1.
pub async fn run(config: Config) -> ExitCode {
    let fail_on = config.fail_on.clone();
    let fail_on_pct = config.fail_on_pct;

    match run_ingest(config).await {
        Ok(report) => {
            println!(
                "Ingested {} file{} ({} processed, {} failed, {} skipped) in {:.1}s",
                report.total_files,
                if report.total_files == 1 { "" } else { "s" },
                report.processed,
                report.failed,
                report.skipped,
                report.elapsed_seconds
            );
            println!("Audit ledger: {}", report.db_path.display());
            ExitCode::from(evaluate_exit_code(&fail_on, fail_on_pct, &report))
        }
        Err(e) => {
            error!("Ingest failed: {e:#}");
            eprintln!("doc_ingest error: {e:#}");
            ExitCode::from(1)
        }
    }
}
