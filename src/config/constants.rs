//! Configuration constants.
//!
//! This module defines the operational defaults used throughout the ingestion
//! pipeline: fan-out sizes, pool limits, retry bounds and storage layout.

use std::time::Duration;

// Fan-out defaults
/// Number of workers spawned per chunk (outer fan-out)
pub const DEFAULT_PROCESSES: usize = 2;
/// Concurrent files per worker (inner fan-out)
pub const DEFAULT_THREADS_PER_PROCESS: usize = 8;
/// Number of keys handed to one round of workers.
/// Bounds in-flight work so a prefix with millions of keys never queues them all at once.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

// Connection pool
/// Minimum idle connections kept by each worker's pool
pub const DEFAULT_POOL_MIN_CONNECTIONS: u32 = 1;
/// Maximum concurrent checkouts per worker pool (semaphore capacity)
pub const DEFAULT_POOL_MAX_CONNECTIONS: u32 = 5;
/// Fixed backoff between pool creation attempts on connectivity errors
pub const POOL_CONNECT_RETRY_BACKOFF: Duration = Duration::from_secs(3);
/// Timeout for a single low-level checkout once a permit is held.
/// The semaphore keeps callers queued, so this only fires when the database itself stalls.
pub const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
/// SQLite busy timeout applied to every connection
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
/// Connections used by the orchestrator itself (bulk ledger reads, run metadata)
pub const ORCHESTRATOR_POOL_MAX_CONNECTIONS: u32 = 2;

// Stage retry strategy (enrichment, index publish, derived artifact writes)
/// Maximum attempts for a stage call that keeps failing transiently (including the first)
pub const STAGE_RETRY_MAX_ATTEMPTS: usize = 10;
/// Fixed delay between stage retry attempts in milliseconds
pub const STAGE_RETRY_DELAY_MS: u64 = 1000;

// Ledger write retry strategy (SQLITE_BUSY / SQLITE_LOCKED)
pub const LEDGER_RETRY_MAX_ATTEMPTS: usize = 4;
pub const LEDGER_RETRY_DELAY_MS: u64 = 50;

// Listing retry strategy
pub const LISTING_RETRY_MAX_ATTEMPTS: usize = 5;
pub const LISTING_RETRY_DELAY_MS: u64 = 1000;

/// Progress is logged every time this share (in percent) of a prefix completes
pub const PROGRESS_STEP_PERCENT: usize = 5;

// Text extraction
/// Below this many non-whitespace characters the text layer is treated as missing and OCR runs
pub const DEFAULT_OCR_MIN_TEXT_CHARS: usize = 200;
pub const DEFAULT_OCR_LANG: &str = "eng";

/// File extensions the pipeline accepts (lowercase, without the dot)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "tif", "tiff", "png", "jpg", "jpeg", "txt"];

// Derived artifact layout
/// Key prefix under which extracted text and published documents are written
pub const DEFAULT_ARTIFACT_PREFIX: &str = "_ingest";

// Search index
pub const DEFAULT_INDEX_ALIAS: &str = "documents";
/// Per-request timeout for search index calls in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum error message length stored in the failure ledger (characters)
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 2000;

pub const DB_PATH: &str = "./doc_ingest.db";

// HTTP status codes (for clarity and consistency)
pub const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;
