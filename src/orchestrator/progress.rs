//! Per-prefix counters and progress logging.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::info;

use crate::config::PROGRESS_STEP_PERCENT;
use crate::pipeline::FileOutcome;

/// Outcome counters for one prefix, shared by every worker of every chunk.
///
/// A progress line is logged each time another `PROGRESS_STEP_PERCENT` of
/// the prefix completes. `fetch_max` on the last logged step makes sure each
/// step is logged once even when workers finish files concurrently.
pub struct PrefixProgress {
    prefix: String,
    total: usize,
    processed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    last_step: AtomicUsize,
    started: Instant,
}

impl PrefixProgress {
    pub fn new(prefix: &str, total: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            total,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            last_step: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn record(&self, outcome: FileOutcome) {
        let counter = match outcome {
            FileOutcome::Processed => &self.processed,
            FileOutcome::Skipped(_) => &self.skipped,
            FileOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.maybe_log();
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.processed() + self.failed() + self.skipped()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Highest step logged so far, in percent.
    pub fn last_logged_percent(&self) -> usize {
        self.last_step.load(Ordering::SeqCst) * PROGRESS_STEP_PERCENT
    }

    fn maybe_log(&self) {
        if self.total == 0 {
            return;
        }
        let completed = self.completed();
        let step = completed * 100 / self.total / PROGRESS_STEP_PERCENT;
        if step == 0 || self.last_step.fetch_max(step, Ordering::SeqCst) >= step {
            return;
        }

        let elapsed = self.elapsed_seconds();
        #[allow(clippy::cast_precision_loss)]
        let rate = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };
        info!(
            "[{}] {}% ({}/{}): {} processed, {} failed, {} skipped ({:.1} files/sec)",
            self.prefix,
            step * PROGRESS_STEP_PERCENT,
            completed,
            self.total,
            self.processed(),
            self.failed(),
            self.skipped(),
            rate
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::FailureReason;
    use crate::policy::SkipReason;
    use std::sync::Arc;

    #[test]
    fn test_counts_by_outcome() {
        let progress = PrefixProgress::new("p1", 3);
        progress.record(FileOutcome::Processed);
        progress.record(FileOutcome::Skipped(SkipReason::AlreadyProcessed));
        progress.record(FileOutcome::Failed(FailureReason::Duplicate));
        assert_eq!(progress.processed(), 1);
        assert_eq!(progress.skipped(), 1);
        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.completed(), 3);
        assert_eq!(progress.last_logged_percent(), 100);
    }

    #[test]
    fn test_steps_advance_in_five_percent_increments() {
        let progress = PrefixProgress::new("p1", 200);
        for _ in 0..9 {
            progress.record(FileOutcome::Processed);
        }
        assert_eq!(progress.last_logged_percent(), 0);
        progress.record(FileOutcome::Processed);
        assert_eq!(progress.last_logged_percent(), 5);
        for _ in 0..15 {
            progress.record(FileOutcome::Processed);
        }
        assert_eq!(progress.last_logged_percent(), 10);
    }

    #[test]
    fn test_concurrent_recording_reaches_completion() {
        let progress = Arc::new(PrefixProgress::new("p1", 1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let progress = Arc::clone(&progress);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        progress.record(FileOutcome::Processed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(progress.completed(), 1000);
        assert_eq!(progress.last_logged_percent(), 100);
    }

    #[test]
    fn test_empty_prefix_never_logs() {
        let progress = PrefixProgress::new("empty", 0);
        assert_eq!(progress.completed(), 0);
        assert_eq!(progress.last_logged_percent(), 0);
    }
}
