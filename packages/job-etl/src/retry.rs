//! Retry with a fixed delay and a per-attempt timeout.
//!
//! Every external call in the pipeline (page fetch, detail fetch,
//! classification, embedding) goes through [`with_retry`]. A timeout is
//! treated exactly like any other transient failure.

use std::future::Future;

use tokio::time::{sleep, timeout};
use tracing::{error, warn};

use crate::error::{FetchError, ProviderError};
use crate::types::config::RetryPolicy;

/// Errors that know whether they are worth retrying.
pub trait Transient: Sized {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;

    /// Error value representing a timed-out attempt.
    fn timed_out(operation: &str) -> Self;
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        FetchError::is_transient(self)
    }

    fn timed_out(operation: &str) -> Self {
        FetchError::Timeout {
            target: operation.to_string(),
        }
    }
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }

    fn timed_out(_operation: &str) -> Self {
        ProviderError::Timeout
    }
}

/// The final error of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails non-transiently, or the policy's
/// attempts are used up.
///
/// `op` is called once per attempt so each attempt gets a fresh future.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(operation)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Transient failure, retrying"
                );
                sleep(policy.delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    error!(operation = %operation, attempts = attempt, error = %e, "Retries exhausted");
                } else {
                    warn!(operation = %operation, error = %e, "Non-retryable failure");
                }
                return Err(RetryFailure {
                    error: e,
                    attempts: attempt,
                });
            }
        }
    }
}
