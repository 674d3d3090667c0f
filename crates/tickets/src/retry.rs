//! Timeout and retry helpers for registry calls.
//!
//! [`with_retry`] re-runs an operation while it fails with a transient
//! error ([`TicketError::is_transient`]). Everything else, including
//! conflicts and duplicates, is returned on the first failure.
//! [`with_timeout`] bounds a single call and reports an elapsed deadline as
//! [`TicketError::RegistryUnavailable`].
//!
//! # Backoff Strategy
//!
//! `min(initial_backoff * 2^attempt, max_backoff)` plus 0-50% random jitter.

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;

use crate::{
    config::RetryConfig,
    error::{TicketError, TicketResult},
};

/// Runs `operation`, retrying transient failures per `config`.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once retries are exhausted.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> TicketResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TicketResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => {
                if attempt > 0 && err.is_transient() {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted",
                    );
                }
                return Err(err);
            },
        }
    }
}

/// Runs `operation` under `timeout`.
///
/// # Errors
///
/// [`TicketError::RegistryUnavailable`] when the deadline passes, otherwise
/// whatever `operation` returns.
pub async fn with_timeout<Fut, T>(
    timeout: Duration,
    operation_name: &str,
    operation: Fut,
) -> TicketResult<T>
where
    Fut: Future<Output = TicketResult<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "registry operation timed out",
            );
            Err(TicketError::unavailable(format!(
                "{operation_name} timed out after {}ms",
                timeout.as_millis()
            )))
        },
    }
}

/// Delay before retry number `attempt + 1`.
pub(crate) fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_range))
    } else {
        capped
    }
}
