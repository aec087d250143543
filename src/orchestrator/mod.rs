//! Run orchestration.
//!
//! Prefixes are processed one after another. For each prefix the keys are
//! listed once, files the ledger already settles are skipped in bulk, and the
//! rest is split into chunks. Each chunk is dealt out to `processes` workers,
//! each with its own connection pool and up to `threads` files in flight.
//! When a prefix is done the index is finalized and its scratch space removed.

mod finalize;
mod prefix;
mod progress;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;

use crate::backends::Backends;
use crate::config::{Config, ORCHESTRATOR_POOL_MAX_CONNECTIONS};
use crate::error_handling::ProcessingStats;
use crate::initialization::build_backends;
use crate::policy::JobType;
use crate::storage::{
    insert_prefix_stats, insert_run_metadata, run_migrations, update_run_stats, AuditLedger,
    BoundedConnectionPool, PoolSettings, RunCounters, RunMetadata,
};
use crate::utils::sanitize::safe_path_component;

use progress::PrefixProgress;

/// Counters for one prefix of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixReport {
    pub prefix: String,
    /// Keys listed under the prefix
    pub total_files: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_seconds: f64,
}

impl PrefixReport {
    fn from_progress(progress: &PrefixProgress, prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            total_files: progress.total(),
            processed: progress.processed(),
            failed: progress.failed(),
            skipped: progress.skipped(),
            elapsed_seconds: progress.elapsed_seconds(),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn counters(&self) -> RunCounters {
        RunCounters {
            total_files: self.total_files as i64,
            processed_files: self.processed as i64,
            failed_files: self.failed as i64,
            skipped_files: self.skipped as i64,
            elapsed_seconds: self.elapsed_seconds,
        }
    }
}

/// Results of an ingest run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Run identifier (format: `ingest_<timestamp_millis>`)
    pub run_id: String,
    pub job_type: JobType,
    /// One entry per prefix, in processing order
    pub prefixes: Vec<PrefixReport>,
    pub total_files: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_seconds: f64,
    /// Path to the audit ledger
    pub db_path: PathBuf,
}

impl IngestReport {
    /// Failed files as a percentage of all listed files. Zero for an empty run.
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_percentage(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.failed as f64 * 100.0 / self.total_files as f64
        }
    }
}

/// State shared by all prefixes of a run.
pub(crate) struct RunContext {
    pub config: Config,
    pub backends: Backends,
    pub stats: Arc<ProcessingStats>,
    /// Ledger on the orchestrator's own pool, for bulk reads
    pub ledger: AuditLedger,
}

impl RunContext {
    pub fn scratch_dir_for(&self, prefix: &str) -> PathBuf {
        self.config.scratch_dir.join(safe_path_component(prefix))
    }
}

/// Runs an ingest with collaborators built from `config`.
///
/// # Errors
///
/// Returns an error if a collaborator cannot be initialized, or for any
/// fatal error described on [`run_with_backends`].
pub async fn run_ingest(config: Config) -> Result<IngestReport> {
    config.validate()?;
    let index_suffix = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let backends = build_backends(&config, &index_suffix)
        .await
        .context("Failed to initialize backends")?;
    run_with_backends(config, backends).await
}

/// Runs an ingest against the given collaborators.
///
/// Per-file problems never fail the run; they end up in the failure ledger
/// and in the report counters.
///
/// # Errors
///
/// Returns an error for invalid configuration, a ledger that cannot be
/// opened or migrated, a prefix that cannot be listed, a worker whose
/// connection pool cannot be created, or an index that cannot be finalized.
pub async fn run_with_backends(config: Config, backends: Backends) -> Result<IngestReport> {
    config.validate()?;
    let start_time = Instant::now();

    let pool = Arc::new(BoundedConnectionPool::new(
        PoolSettings::new(&config.db_path).with_bounds(1, ORCHESTRATOR_POOL_MAX_CONNECTIONS),
    ));
    pool.warm_up()
        .await
        .with_context(|| format!("Failed to open audit ledger {}", config.db_path.display()))?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let start_time_ms = Utc::now().timestamp_millis();
    let run_id = format!("ingest_{start_time_ms}");
    info!(
        "Starting run {run_id} ({}, {} prefix(es), {} workers x {} files)",
        config.job_type,
        config.prefixes.len(),
        config.processes,
        config.threads_per_process
    );
    insert_run_metadata(
        &pool,
        &RunMetadata {
            run_id: &run_id,
            start_time_ms,
            version: env!("CARGO_PKG_VERSION"),
            job_type: config.job_type.as_str(),
        },
    )
    .await
    .context("Failed to insert run metadata")?;

    let run = RunContext {
        ledger: AuditLedger::new(Arc::clone(&pool)),
        stats: Arc::new(ProcessingStats::new()),
        backends,
        config,
    };

    let mut prefixes = Vec::with_capacity(run.config.prefixes.len());
    for prefix in &run.config.prefixes {
        let progress = prefix::process_prefix(&run, prefix).await?;
        finalize::finalize_prefix(
            run.backends.index.as_ref(),
            prefix,
            &run.scratch_dir_for(prefix),
            run.config.stage_retry_policy(),
        )
        .await?;

        let report = PrefixReport::from_progress(&progress, prefix);
        info!(
            "[{prefix}] done: {} files, {} processed, {} failed, {} skipped in {:.1}s",
            report.total_files,
            report.processed,
            report.failed,
            report.skipped,
            report.elapsed_seconds
        );
        insert_prefix_stats(&pool, &run_id, prefix, &report.counters())
            .await
            .context("Failed to record prefix statistics")?;
        prefixes.push(report);
    }

    let report = IngestReport {
        total_files: prefixes.iter().map(|p| p.total_files).sum(),
        processed: prefixes.iter().map(|p| p.processed).sum(),
        failed: prefixes.iter().map(|p| p.failed).sum(),
        skipped: prefixes.iter().map(|p| p.skipped).sum(),
        elapsed_seconds: start_time.elapsed().as_secs_f64(),
        run_id,
        job_type: run.config.job_type,
        prefixes,
        db_path: run.config.db_path.clone(),
    };

    #[allow(clippy::cast_possible_wrap)]
    let totals = RunCounters {
        total_files: report.total_files as i64,
        processed_files: report.processed as i64,
        failed_files: report.failed as i64,
        skipped_files: report.skipped as i64,
        elapsed_seconds: report.elapsed_seconds,
    };
    update_run_stats(&pool, &report.run_id, &totals)
        .await
        .context("Failed to update run statistics")?;

    run.stats.log_summary();
    pool.close().await;
    Ok(report)
}
