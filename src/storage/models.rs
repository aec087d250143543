//! Typed ledger rows.
//!
//! These are the only shapes that cross the storage boundary; column mapping
//! lives in `ledger.rs`.

use crate::error_handling::FailureReason;
use crate::utils::sanitize::sanitize_and_truncate_error_message;

/// A stored success row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessRecord {
    pub filename: String,
    pub source_path: String,
    pub base_path: String,
    pub extracted_text_path: Option<String>,
    pub published_doc_path: Option<String>,
    pub is_ocr_applied: bool,
    pub is_supplementary_data_a: bool,
    pub is_supplementary_data_b: bool,
    pub is_third_party_enriched: bool,
    pub is_indexed: bool,
    pub supplementary_file_missing: bool,
    pub last_modified_ms: i64,
}

/// Input to [`AuditLedger::record_success`](super::AuditLedger::record_success).
///
/// `None` means "this pass did not touch the field": the stored value is kept
/// on conflict (and the column default is used on first insert). `Some(false)`
/// clears a flag explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessUpdate {
    pub filename: String,
    pub source_path: String,
    pub base_path: String,
    pub extracted_text_path: Option<String>,
    pub published_doc_path: Option<String>,
    pub is_ocr_applied: Option<bool>,
    pub is_supplementary_data_a: Option<bool>,
    pub is_supplementary_data_b: Option<bool>,
    pub is_third_party_enriched: Option<bool>,
    pub is_indexed: Option<bool>,
    pub supplementary_file_missing: Option<bool>,
}

impl SuccessUpdate {
    pub fn new(
        filename: impl Into<String>,
        source_path: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            source_path: source_path.into(),
            base_path: base_path.into(),
            ..Default::default()
        }
    }
}

/// Result of a success upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessWrite {
    /// Inserted, or merged into the existing row for the same base path
    Merged,
    /// The filename is already recorded under another base path; nothing was written
    BasePathConflict { existing_base_path: String },
}

/// A failure row keyed by `(filename, base_path)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub filename: String,
    pub base_path: String,
    /// Stable reason string, see [`FailureReason::as_str`]
    pub reason: String,
    pub error_message: Option<String>,
    pub last_modified_ms: i64,
}

impl FailureRecord {
    /// Builds a record stamped with the current time. The error message is
    /// sanitized and truncated before it is stored.
    pub fn new(
        filename: impl Into<String>,
        base_path: impl Into<String>,
        reason: FailureReason,
        error_message: Option<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            base_path: base_path.into(),
            reason: reason.as_str().to_string(),
            error_message: error_message.map(|m| sanitize_and_truncate_error_message(&m)),
            last_modified_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The typed reason, if the stored string is one this build knows.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        FailureReason::from_stored(&self.reason)
    }
}
