//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing
//! and configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::constants::*;
use crate::policy::JobType;
use crate::utils::RetryPolicy;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Which search index implementation receives published documents.
#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum IndexBackend {
    /// Elasticsearch/OpenSearch compatible HTTP endpoint
    Http,
    /// JSON Lines files in a local directory
    Jsonl,
}

/// When the process should exit non-zero because of per-file failures.
#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum FailOn {
    /// Always exit 0 unless the run itself errored
    Never,
    /// Exit 2 if any file failed
    AnyFailure,
    /// Exit 2 if the failure percentage exceeds `--fail-on-pct`
    #[value(name = "pct>")]
    PctGreaterThan,
}

/// Library configuration (no CLI dependencies).
///
/// Read once at startup and passed by value into the orchestrator.
///
/// # Examples
///
/// ```no_run
/// use doc_ingest::Config;
/// use std::path::PathBuf;
///
/// let config = Config {
///     storage_root: PathBuf::from("/mnt/scans"),
///     prefixes: vec!["2024/batch-01".to_string()],
///     processes: 4,
///     threads_per_process: 16,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the object store
    pub storage_root: PathBuf,

    /// Storage prefixes processed one after another
    pub prefixes: Vec<String>,

    /// Audit ledger database path (SQLite file)
    pub db_path: PathBuf,

    /// Reference metadata database (SQLite file); enrichment degrades to "no match" when absent
    pub reference_db: Option<PathBuf>,

    /// Search index implementation
    pub index_backend: IndexBackend,

    /// Base URL of the HTTP search index (required for `IndexBackend::Http`)
    pub index_url: Option<String>,

    /// Alias that readers query; swapped to the freshly built index on finalize
    pub index_alias: String,

    /// Output directory for `IndexBackend::Jsonl`
    pub index_dir: PathBuf,

    /// Local scratch directory for OCR intermediates, removed per prefix
    pub scratch_dir: PathBuf,

    /// Key prefix for derived artifacts (extracted text, published documents)
    pub artifact_prefix: String,

    /// Workers spawned per chunk, each with its own connection pool
    pub processes: usize,

    /// Concurrent files per worker
    pub threads_per_process: usize,

    /// Keys per chunk
    pub chunk_size: usize,

    /// Minimum connections per worker pool
    pub pool_min_connections: u32,

    /// Maximum concurrent checkouts per worker pool
    pub pool_max_connections: u32,

    /// Processing mode
    pub job_type: JobType,

    /// Tesseract language
    pub ocr_lang: String,

    /// Text-layer threshold below which OCR runs
    pub ocr_min_text_chars: usize,

    /// Attempts for transiently failing stage calls (including the first)
    pub stage_retry_attempts: usize,

    /// Delay between stage retry attempts
    pub stage_retry_delay: Duration,

    /// Per-request timeout for search index calls in seconds
    pub request_timeout_seconds: u64,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Exit code policy
    pub fail_on: FailOn,

    /// Threshold for `FailOn::PctGreaterThan`
    pub fail_on_pct: u8,
}

impl Config {
    /// Retry policy applied to enrichment, index publish and artifact writes.
    pub fn stage_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.stage_retry_attempts, self.stage_retry_delay)
    }

    /// Checks invariants that would otherwise surface as confusing runtime errors.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.prefixes.is_empty() {
            anyhow::bail!("at least one storage prefix is required");
        }
        if self.processes == 0 || self.threads_per_process == 0 {
            anyhow::bail!("processes and threads per process must be at least 1");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk size must be at least 1");
        }
        if self.pool_max_connections == 0 || self.pool_min_connections > self.pool_max_connections
        {
            anyhow::bail!(
                "invalid pool size: min {} max {}",
                self.pool_min_connections,
                self.pool_max_connections
            );
        }
        if self.stage_retry_attempts == 0 {
            anyhow::bail!("stage retry attempts must be at least 1");
        }
        if self.index_backend == IndexBackend::Http && self.index_url.is_none() {
            anyhow::bail!("--index-url is required with the http index backend");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("."),
            prefixes: Vec::new(),
            db_path: PathBuf::from(DB_PATH),
            reference_db: None,
            index_backend: IndexBackend::Jsonl,
            index_url: None,
            index_alias: DEFAULT_INDEX_ALIAS.to_string(),
            index_dir: PathBuf::from("./index"),
            scratch_dir: std::env::temp_dir().join("doc_ingest"),
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            processes: DEFAULT_PROCESSES,
            threads_per_process: DEFAULT_THREADS_PER_PROCESS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pool_min_connections: DEFAULT_POOL_MIN_CONNECTIONS,
            pool_max_connections: DEFAULT_POOL_MAX_CONNECTIONS,
            job_type: JobType::Normal,
            ocr_lang: DEFAULT_OCR_LANG.to_string(),
            ocr_min_text_chars: DEFAULT_OCR_MIN_TEXT_CHARS,
            stage_retry_attempts: STAGE_RETRY_MAX_ATTEMPTS,
            stage_retry_delay: Duration::from_millis(STAGE_RETRY_DELAY_MS),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            fail_on: FailOn::Never,
            fail_on_pct: 10,
        }
    }
}

/// Command-line options for the `doc_ingest` binary.
///
/// Every option can also be supplied through the environment (or a `.env` file).
#[derive(Debug, Parser)]
#[command(name = "doc_ingest", version, about = "Ingest scanned documents into a search index")]
pub struct Opt {
    /// Storage prefixes to process, in order
    #[arg(required = true, value_name = "PREFIX")]
    pub prefixes: Vec<String>,

    /// Root directory of the object store
    #[arg(long, env = "INGEST_STORAGE_ROOT", default_value = ".")]
    pub storage_root: PathBuf,

    /// Audit ledger database path
    #[arg(long, env = "INGEST_DB_PATH", default_value = DB_PATH)]
    pub db_path: PathBuf,

    /// Reference metadata database path
    #[arg(long, env = "INGEST_REFERENCE_DB")]
    pub reference_db: Option<PathBuf>,

    /// Search index backend
    #[arg(long, env = "INGEST_INDEX_BACKEND", value_enum, default_value = "jsonl")]
    pub index_backend: IndexBackend,

    /// Search index base URL (http backend)
    #[arg(long, env = "INGEST_INDEX_URL")]
    pub index_url: Option<String>,

    /// Search index alias
    #[arg(long, env = "INGEST_INDEX_ALIAS", default_value = DEFAULT_INDEX_ALIAS)]
    pub index_alias: String,

    /// Output directory (jsonl backend)
    #[arg(long, env = "INGEST_INDEX_DIR", default_value = "./index")]
    pub index_dir: PathBuf,

    /// Scratch directory for OCR intermediates
    #[arg(long, env = "INGEST_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Key prefix for derived artifacts
    #[arg(long, env = "INGEST_ARTIFACT_PREFIX", default_value = DEFAULT_ARTIFACT_PREFIX)]
    pub artifact_prefix: String,

    /// Workers per chunk (number of datasets processed at a time)
    #[arg(long, env = "INGEST_PROCESSES", default_value_t = DEFAULT_PROCESSES)]
    pub processes: usize,

    /// Concurrent files per worker
    #[arg(long, env = "INGEST_THREADS", default_value_t = DEFAULT_THREADS_PER_PROCESS)]
    pub threads: usize,

    /// Keys per chunk
    #[arg(long, env = "INGEST_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Minimum connections per worker pool
    #[arg(long, env = "INGEST_POOL_MIN", default_value_t = DEFAULT_POOL_MIN_CONNECTIONS)]
    pub pool_min: u32,

    /// Maximum concurrent checkouts per worker pool
    #[arg(long, env = "INGEST_POOL_MAX", default_value_t = DEFAULT_POOL_MAX_CONNECTIONS)]
    pub pool_max: u32,

    /// Processing mode
    #[arg(long, env = "INGEST_JOB_TYPE", value_enum, default_value = "normal")]
    pub job_type: JobType,

    /// Tesseract language
    #[arg(long, env = "INGEST_OCR_LANG", default_value = DEFAULT_OCR_LANG)]
    pub ocr_lang: String,

    /// Minimum text-layer characters before OCR is skipped
    #[arg(long, default_value_t = DEFAULT_OCR_MIN_TEXT_CHARS)]
    pub ocr_min_text_chars: usize,

    /// Attempts for transiently failing stage calls
    #[arg(long, default_value_t = STAGE_RETRY_MAX_ATTEMPTS)]
    pub stage_retry_attempts: usize,

    /// Delay between stage retry attempts in milliseconds
    #[arg(long, default_value_t = STAGE_RETRY_DELAY_MS)]
    pub stage_retry_delay_ms: u64,

    /// Search index request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout_seconds: u64,

    /// Log level
    #[arg(long, env = "INGEST_LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain")]
    pub log_format: LogFormat,

    /// Exit code policy for per-file failures
    #[arg(long, value_enum, default_value = "never")]
    pub fail_on: FailOn,

    /// Failure percentage threshold for `--fail-on pct>`
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub fail_on_pct: u8,
}

impl From<Opt> for Config {
    fn from(opt: Opt) -> Self {
        let defaults = Config::default();
        Self {
            storage_root: opt.storage_root,
            prefixes: opt.prefixes,
            db_path: opt.db_path,
            reference_db: opt.reference_db,
            index_backend: opt.index_backend,
            index_url: opt.index_url,
            index_alias: opt.index_alias,
            index_dir: opt.index_dir,
            scratch_dir: opt.scratch_dir.unwrap_or(defaults.scratch_dir),
            artifact_prefix: opt.artifact_prefix,
            processes: opt.processes,
            threads_per_process: opt.threads,
            chunk_size: opt.chunk_size,
            pool_min_connections: opt.pool_min,
            pool_max_connections: opt.pool_max,
            job_type: opt.job_type,
            ocr_lang: opt.ocr_lang,
            ocr_min_text_chars: opt.ocr_min_text_chars,
            stage_retry_attempts: opt.stage_retry_attempts,
            stage_retry_delay: Duration::from_millis(opt.stage_retry_delay_ms),
            request_timeout_seconds: opt.timeout_seconds,
            log_level: opt.log_level,
            log_format: opt.log_format,
            fail_on: opt.fail_on,
            fail_on_pct: opt.fail_on_pct,
        }
    }
}
