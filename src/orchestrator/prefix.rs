//! One prefix: list, precompute skips, chunk, fan out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};

use super::progress::PrefixProgress;
use super::worker::{run_worker, WorkerSettings};
use super::RunContext;
use crate::config::{LISTING_RETRY_DELAY_MS, LISTING_RETRY_MAX_ATTEMPTS};
use crate::error_handling::is_transient_error;
use crate::pipeline::{FileOutcome, ObjectKey};
use crate::policy::{decide, Decision, JobType, LedgerState, SkipReason};
use crate::storage::{FailureRecord, PoolSettings, SuccessRecord};
use crate::utils::{retry_call, RetryPolicy};

/// Lists every key under `prefix`, retrying transient listing errors.
pub(super) async fn list_keys(run: &RunContext, prefix: &str) -> Result<Vec<String>> {
    let policy = RetryPolicy::fixed(
        LISTING_RETRY_MAX_ATTEMPTS,
        Duration::from_millis(LISTING_RETRY_DELAY_MS),
    );
    let store = &run.backends.object_store;
    let retried = retry_call(policy, || store.list_objects(prefix), is_transient_error).await;
    retried
        .result
        .with_context(|| format!("Failed to list objects under '{prefix}'"))
}

/// Splits listed keys into those that still need the pipeline and those the
/// bulk ledger read already settles.
///
/// Only definitive states skip here: a success under the key's own base path
/// or a failure for the exact `(filename, base_path)`. Anything else,
/// including successes under another base path, goes through the pipeline so
/// that duplicates get their failure record.
pub(super) fn precompute_skips(
    job_type: JobType,
    keys: Vec<String>,
    successes: &HashMap<String, SuccessRecord>,
    failures: &HashMap<(String, String), FailureRecord>,
) -> (Vec<String>, Vec<(String, SkipReason)>) {
    let mut pending = Vec::with_capacity(keys.len());
    let mut skipped = Vec::new();

    for key in keys {
        let object = ObjectKey::parse(&key);
        let filename = object.filename().to_string();
        let base_path = object.base_path().to_string();

        let state = if successes
            .get(&filename)
            .is_some_and(|record| record.base_path == base_path)
        {
            Some(LedgerState::SucceededHere)
        } else if failures.contains_key(&(filename, base_path)) {
            Some(LedgerState::Failed)
        } else {
            None
        };

        match state.map(|state| decide(job_type, &state)) {
            Some(Decision::Skip(reason)) => skipped.push((key, reason)),
            _ => pending.push(key),
        }
    }

    (pending, skipped)
}

/// Deals a chunk out to at most `workers` partitions, round-robin.
pub(super) fn partition(chunk: &[String], workers: usize) -> Vec<Vec<String>> {
    let workers = workers.max(1).min(chunk.len());
    let mut partitions = vec![Vec::new(); workers];
    for (i, key) in chunk.iter().enumerate() {
        partitions[i % workers].push(key.clone());
    }
    partitions
}

/// Runs every listed key of `prefix` to an outcome.
///
/// Returns the prefix's progress counters. A worker that cannot open its
/// connection pool fails the whole prefix once the rest of its chunk is done.
pub(super) async fn process_prefix(run: &RunContext, prefix: &str) -> Result<Arc<PrefixProgress>> {
    let keys = list_keys(run, prefix).await?;
    info!("[{prefix}] {} objects listed", keys.len());

    let progress = Arc::new(PrefixProgress::new(prefix, keys.len()));
    if keys.is_empty() {
        return Ok(progress);
    }

    let successes = run
        .ledger
        .list_by_base_path(prefix)
        .await
        .with_context(|| format!("Failed to read success records under '{prefix}'"))?;
    let failures = run
        .ledger
        .list_failures_by_base_path(prefix)
        .await
        .with_context(|| format!("Failed to read failure records under '{prefix}'"))?;

    let (pending, skipped) = precompute_skips(run.config.job_type, keys, &successes, &failures);
    drop(successes);
    drop(failures);
    for (key, reason) in &skipped {
        debug!("Skipped {key}: {}", reason.as_str());
        run.stats.increment_skip(*reason);
        progress.record(FileOutcome::Skipped(*reason));
    }
    info!(
        "[{prefix}] {} skipped from ledger, {} to process",
        skipped.len(),
        pending.len()
    );

    let config = &run.config;
    let settings = Arc::new(WorkerSettings {
        backends: run.backends.clone(),
        pool: PoolSettings::new(&config.db_path)
            .with_bounds(config.pool_min_connections, config.pool_max_connections),
        job_type: config.job_type,
        stage_retry: config.stage_retry_policy(),
        threads: config.threads_per_process,
        scratch_dir: run.scratch_dir_for(prefix),
        artifact_prefix: config.artifact_prefix.clone(),
        stats: Arc::clone(&run.stats),
        progress: Arc::clone(&progress),
    });

    let chunk_count = pending.len().div_ceil(config.chunk_size);
    for (chunk_index, chunk) in pending.chunks(config.chunk_size).enumerate() {
        debug!(
            "[{prefix}] chunk {}/{chunk_count} ({} files)",
            chunk_index + 1,
            chunk.len()
        );

        let handles: Vec<_> = partition(chunk, config.processes)
            .into_iter()
            .enumerate()
            .map(|(worker_id, keys)| {
                tokio::spawn(run_worker(worker_id, Arc::clone(&settings), keys))
            })
            .collect();

        let mut first_error = None;
        for joined in futures::future::join_all(handles).await {
            let result = match joined {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(e) => Err(anyhow::Error::from(e).context("worker task failed")),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e.context(format!("Worker failed while processing '{prefix}'")));
        }
    }

    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(filename: &str, base_path: &str) -> (String, SuccessRecord) {
        (
            filename.to_string(),
            SuccessRecord {
                filename: filename.to_string(),
                source_path: format!("{base_path}/{filename}"),
                base_path: base_path.to_string(),
                ..Default::default()
            },
        )
    }

    fn failure(filename: &str, base_path: &str) -> ((String, String), FailureRecord) {
        (
            (filename.to_string(), base_path.to_string()),
            FailureRecord::new(
                filename,
                base_path,
                crate::error_handling::FailureReason::SourceUnavailable,
                None,
            ),
        )
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_precompute_skips_definitive_states_only() {
        let successes = HashMap::from([success("A.pdf", "p1"), success("C.pdf", "p0")]);
        let failures = HashMap::from([failure("B.pdf", "p1")]);

        let (pending, skipped) = precompute_skips(
            JobType::Normal,
            keys(&["p1/A.pdf", "p1/B.pdf", "p1/C.pdf", "p1/D.pdf"]),
            &successes,
            &failures,
        );

        // C.pdf succeeded elsewhere: the pipeline records the duplicate
        assert_eq!(pending, keys(&["p1/C.pdf", "p1/D.pdf"]));
        assert_eq!(
            skipped,
            vec![
                ("p1/A.pdf".to_string(), SkipReason::AlreadyProcessed),
                ("p1/B.pdf".to_string(), SkipReason::PreviouslyFailed),
            ]
        );
    }

    #[test]
    fn test_precompute_keeps_reprocess_candidates() {
        let successes = HashMap::from([success("A.pdf", "p1")]);
        let (pending, skipped) = precompute_skips(
            JobType::Reprocess,
            keys(&["p1/A.pdf"]),
            &successes,
            &HashMap::new(),
        );
        assert_eq!(pending, keys(&["p1/A.pdf"]));
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_precompute_leaves_new_files_to_the_pipeline() {
        // update_metadata_skip_new skips new files, but only the pipeline
        // can tell a new file from one recorded since the bulk read
        let (pending, skipped) = precompute_skips(
            JobType::UpdateMetadataSkipNew,
            keys(&["p1/new.pdf"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(pending, keys(&["p1/new.pdf"]));
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_success_here_wins_over_failure() {
        let successes = HashMap::from([success("A.pdf", "p1")]);
        let failures = HashMap::from([failure("A.pdf", "p1")]);
        let (_, skipped) = precompute_skips(
            JobType::Normal,
            keys(&["p1/A.pdf"]),
            &successes,
            &failures,
        );
        assert_eq!(skipped[0].1, SkipReason::AlreadyProcessed);
    }

    #[test]
    fn test_partition_round_robin() {
        let chunk = keys(&["a", "b", "c", "d", "e"]);
        let parts = partition(&chunk, 2);
        assert_eq!(parts, vec![keys(&["a", "c", "e"]), keys(&["b", "d"])]);
    }

    #[test]
    fn test_partition_never_creates_empty_workers() {
        let chunk = keys(&["a", "b"]);
        let parts = partition(&chunk, 8);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 1));
    }
}
