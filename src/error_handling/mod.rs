//! Error handling and processing statistics.
//!
//! This module provides:
//! - Error type definitions and the persisted failure reasons
//! - Transient vs. fatal classification used by every retry site
//! - Processing statistics tracking (failures, skips, info events)

mod categorization;
mod stats;
mod types;

// Re-export public API
pub use categorization::{is_connectivity_error, is_lock_contention, is_transient_error};
pub use stats::ProcessingStats;
pub use types::{
    DatabaseError, FailureReason, InfoType, InitializationError, PoolError, TransientError,
};
