//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (fan-out sizes, pool limits, retry bounds)
//! - The library `Config` struct
//! - CLI option types and parsing

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, FailOn, IndexBackend, LogFormat, LogLevel, Opt};
