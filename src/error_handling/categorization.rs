//! Transient vs. fatal error classification.
//!
//! Retry decisions across the crate go through these predicates so the
//! policy lives in one place: connectivity and contention retry, everything
//! else fails fast.

use std::io::ErrorKind;

use anyhow::Error;

use super::types::{DatabaseError, TransientError};

/// Returns `true` for `sqlx` errors that indicate the database could not be
/// reached (as opposed to being misconfigured).
///
/// Configuration, authentication and "unable to open" errors are fatal.
/// Pool exhaustion, I/O failures and closed pools are connectivity-class and
/// lead to the pool being recreated.
pub fn is_connectivity_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => true,
        sqlx::Error::Database(db_err) => is_lock_message(db_err.message()),
        _ => false,
    }
}

/// Returns `true` when SQLite reported lock contention (SQLITE_BUSY / SQLITE_LOCKED).
pub fn is_lock_contention(error: &DatabaseError) -> bool {
    match error {
        DatabaseError::SqlError(sqlx::Error::Database(db_err)) => is_lock_message(db_err.message()),
        DatabaseError::SqlError(other) => is_connectivity_error(other),
        DatabaseError::PoolError(_) | DatabaseError::MigrationError(_) => false,
    }
}

fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

fn is_transient_io(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::UnexpectedEof
            | ErrorKind::WouldBlock
    )
}

/// Determines if an error from an external collaborator is transient.
///
/// Walks the `anyhow` chain and returns on the first typed error it
/// recognises:
///
/// - [`TransientError`] markers are transient
/// - `reqwest` errors: 429 and 5xx are transient, other 4xx are not;
///   timeouts, connect and request errors are transient
/// - `sqlx` errors: connectivity and lock contention are transient
/// - `std::io` errors: connection resets, timeouts and similar are transient
///
/// Anything unrecognised is treated as permanent so that business failures
/// (corrupt input, bad mappings) are recorded once instead of retried.
pub fn is_transient_error(error: &Error) -> bool {
    for cause in error.chain() {
        if cause.downcast_ref::<TransientError>().is_some() {
            return true;
        }

        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = reqwest_err.status() {
                let status_code = status.as_u16();
                if status_code == crate::config::HTTP_STATUS_TOO_MANY_REQUESTS {
                    return true;
                }
                return (500..600).contains(&status_code);
            }
            return reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request();
        }

        if let Some(sqlx_err) = cause.downcast_ref::<sqlx::Error>() {
            return is_connectivity_error(sqlx_err);
        }

        if let Some(db_err) = cause.downcast_ref::<DatabaseError>() {
            return is_lock_contention(db_err);
        }

        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            return is_transient_io(io_err);
        }
    }

    false
}
