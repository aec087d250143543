//! Shared utilities.
//!
//! - One retry helper used by every call to an external dependency
//! - Error message and path sanitization

mod retry;
pub mod sanitize;

pub use retry::{retry_call, Retried, RetryPolicy};
