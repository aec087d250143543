//! Retrying calls to external dependencies.
//!
//! Every retry site in the crate (stage calls, ledger writes, listing) goes
//! through [`retry_call`], so attempt bounds and spacing are defined once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

/// Attempt bound and spacing for a retried call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A policy that never retries.
    pub const fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    fn strategy(&self) -> impl Iterator<Item = Duration> {
        FixedInterval::new(self.delay).take(self.max_attempts.saturating_sub(1))
    }
}

/// Result of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: usize,
}

/// Runs `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or `policy.max_attempts` is exhausted.
///
/// The last error is returned unchanged so callers can classify it.
pub async fn retry_call<T, E, F, Fut, P>(
    policy: RetryPolicy,
    mut operation: F,
    mut is_transient: P,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let attempts = AtomicUsize::new(0);

    let result = RetryIf::spawn(
        policy.strategy(),
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            operation()
        },
        |error: &E| is_transient(error),
    )
    .await;

    Retried {
        result,
        attempts: attempts.load(Ordering::SeqCst),
    }
}
