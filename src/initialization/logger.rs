//! Logger initialization.
//!
//! Plain output is colored for terminals; JSON output emits one object per
//! line for log shippers.

use std::io::Write;

use crate::config::LogFormat;
use crate::error_handling::InitializationError;
use colored::*;
use log::{Level, LevelFilter};

/// Initializes the logger with the specified level and format.
///
/// `RUST_LOG` is read first so per-module filters still apply, then `level`
/// overrides the global and crate levels. Chatty dependencies are capped at
/// `Info` regardless of `level`.
///
/// # Errors
///
/// Returns `InitializationError::LoggerError` if a logger is already installed.
///
/// # Examples
///
/// ```bash
/// # Debug everything in this crate but keep sqlx quiet
/// RUST_LOG=doc_ingest=debug,sqlx=warn doc_ingest 2024/batch-01
///
/// # CLI level wins over RUST_LOG
/// RUST_LOG=debug doc_ingest 2024/batch-01 --log-level info
/// ```
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitializationError> {
    colored::control::set_override(true);

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("sqlx", LevelFilter::Info.min(level));
    builder.filter_module("reqwest", LevelFilter::Info.min(level));
    builder.filter_module("hyper", LevelFilter::Info.min(level));
    builder.filter_module("doc_ingest", level);

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{}",
                    json_line(
                        chrono::Utc::now().timestamp_millis(),
                        record.level(),
                        record.target(),
                        &record.args().to_string()
                    )
                )
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                let level = record.level();
                let colored_level = match level {
                    Level::Error => level.to_string().red(),
                    Level::Warn => level.to_string().yellow(),
                    Level::Info => level.to_string().green(),
                    Level::Debug => level.to_string().blue(),
                    Level::Trace => level.to_string().purple(),
                };
                writeln!(
                    buf,
                    "{} {} [{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.target().cyan(),
                    colored_level,
                    record.args()
                )
            });
        }
    }

    // try_init so that tests installing a logger twice get an error, not a panic
    builder.try_init().map_err(InitializationError::from)?;

    Ok(())
}

/// One JSON log line: `{"ts","level","target","msg"}`.
fn json_line(ts_ms: i64, level: Level, target: &str, message: &str) -> String {
    serde_json::json!({
        "ts": ts_ms,
        "level": level.as_str(),
        "target": target,
        "msg": message,
    })
    .to_string()
}
