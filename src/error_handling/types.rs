//! Error type definitions.
//!
//! This module defines the library error enums and the per-file failure
//! reasons persisted in the audit ledger.

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),

    /// Error opening a collaborator (reference store, index directory, ...).
    #[error("Backend initialization error: {0}")]
    BackendError(String),
}

/// Errors raised by the bounded connection pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Pool construction or checkout failed with a non-connectivity error
    /// (bad path, permissions, invalid configuration). Never retried.
    #[error("Database pool configuration error: {0}")]
    Fatal(#[source] sqlx::Error),

    /// The permit semaphore was closed; only happens during teardown.
    #[error("Database pool is shut down")]
    Closed,
}

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Could not obtain a connection.
    #[error("Connection pool error: {0}")]
    PoolError(#[from] PoolError),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

/// Marks an error from a collaborator as transient (worth retrying in place).
///
/// Backends wrap conditions such as protocol hiccups that are not expressed
/// by a typed `reqwest`/`sqlx`/`io` error.
#[derive(Error, Debug)]
#[error("transient failure: {0}")]
pub struct TransientError(pub String);

/// Why a file ended up in the failure ledger.
///
/// The string form is what gets stored in `audit_failure.reason`, so it must
/// stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum FailureReason {
    UnsupportedFileType,
    Duplicate,
    SourceUnavailable,
    SupplementaryDataMissing,
    EnrichmentFailed,
    IndexPublishFailed,
    ArtifactWriteFailed,
    /// The ledger could not be read or written for this file.
    LedgerUnavailable,
    /// The file task panicked or was aborted.
    TaskAborted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnsupportedFileType => "not a supported file type",
            FailureReason::Duplicate => "duplicate",
            FailureReason::SourceUnavailable => "source file missing/corrupted",
            FailureReason::SupplementaryDataMissing => "supplementary data missing",
            FailureReason::EnrichmentFailed => "metadata enrichment failed",
            FailureReason::IndexPublishFailed => "index publish failed",
            FailureReason::ArtifactWriteFailed => "derived artifact write failed",
            FailureReason::LedgerUnavailable => "audit ledger unavailable",
            FailureReason::TaskAborted => "task aborted",
        }
    }

    /// Parses the stored string form back into a reason.
    pub fn from_stored(value: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        FailureReason::iter().find(|reason| reason.as_str() == value)
    }
}

/// Informational events counted during a run. Not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum InfoType {
    OcrApplied,
    SupplementaryFileMissing,
    MetadataOnlyReindex,
    TransientRetry,
}

impl InfoType {
    /// Returns a human-readable string representation of the info type.
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoType::OcrApplied => "OCR applied",
            InfoType::SupplementaryFileMissing => "No reference metadata matched",
            InfoType::MetadataOnlyReindex => "Metadata-only reindex",
            InfoType::TransientRetry => "Transient error retried",
        }
    }
}
