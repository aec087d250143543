//! Processing statistics tracking.
//!
//! This module provides thread-safe counters for failure reasons, skip
//! causes and informational events during a run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::{FailureReason, InfoType};
use crate::policy::SkipReason;

/// Thread-safe processing statistics tracker.
///
/// All counters are created up front from the enum variants, so increments
/// never allocate and can be shared across worker tasks behind an `Arc`.
pub struct ProcessingStats {
    failures: HashMap<FailureReason, AtomicUsize>,
    skips: HashMap<SkipReason, AtomicUsize>,
    info: HashMap<InfoType, AtomicUsize>,
}

impl ProcessingStats {
    pub fn new() -> Self {
        ProcessingStats {
            failures: FailureReason::iter()
                .map(|reason| (reason, AtomicUsize::new(0)))
                .collect(),
            skips: SkipReason::iter()
                .map(|reason| (reason, AtomicUsize::new(0)))
                .collect(),
            info: InfoType::iter()
                .map(|info_type| (info_type, AtomicUsize::new(0)))
                .collect(),
        }
    }

    pub fn increment_failure(&self, reason: FailureReason) {
        if let Some(counter) = self.failures.get(&reason) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!("Failure counter for {:?} missing from stats map", reason);
        }
    }

    pub fn increment_skip(&self, reason: SkipReason) {
        if let Some(counter) = self.skips.get(&reason) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!("Skip counter for {:?} missing from stats map", reason);
        }
    }

    pub fn increment_info(&self, info_type: InfoType) {
        if let Some(counter) = self.info.get(&info_type) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!("Info counter for {:?} missing from stats map", info_type);
        }
    }

    pub fn get_failure_count(&self, reason: FailureReason) -> usize {
        self.failures
            .get(&reason)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn get_skip_count(&self, reason: SkipReason) -> usize {
        self.skips
            .get(&reason)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn get_info_count(&self, info_type: InfoType) -> usize {
        self.info
            .get(&info_type)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        FailureReason::iter().map(|r| self.get_failure_count(r)).sum()
    }

    pub fn total_skips(&self) -> usize {
        SkipReason::iter().map(|r| self.get_skip_count(r)).sum()
    }

    /// Logs every non-zero counter, grouped by category.
    pub fn log_summary(&self) {
        if self.total_failures() > 0 {
            log::info!("Failures by reason:");
            for reason in FailureReason::iter() {
                let count = self.get_failure_count(reason);
                if count > 0 {
                    log::info!("   {}: {}", reason.as_str(), count);
                }
            }
        }
        if self.total_skips() > 0 {
            log::info!("Skips by cause:");
            for reason in SkipReason::iter() {
                let count = self.get_skip_count(reason);
                if count > 0 {
                    log::info!("   {}: {}", reason.as_str(), count);
                }
            }
        }
        for info_type in InfoType::iter() {
            let count = self.get_info_count(info_type);
            if count > 0 {
                log::info!("{}: {}", info_type.as_str(), count);
            }
        }
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}
