//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `doc_ingest` library that handles:
//! - Environment variable loading (.env file)
//! - Command-line argument parsing
//! - Logger initialization
//!
//! All core functionality is implemented in the library crate.

use std::process::ExitCode;

use clap::Parser;

use doc_ingest::initialization::init_logger_with;
use doc_ingest::{run, Config, Opt};

#[tokio::main]
async fn main() -> ExitCode {
    // Options can come from .env, so load it before parsing; a missing file is fine
    if dotenvy::dotenv().is_err() {
        if let Some(env_path) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        {
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
            }
        }
    }

    let config = Config::from(Opt::parse());

    if let Err(e) = init_logger_with(config.log_level.clone().into(), config.log_format.clone()) {
        eprintln!("doc_ingest error: failed to initialize logger: {e}");
        return ExitCode::from(1);
    }

    run(config).await
}
