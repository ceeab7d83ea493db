//! Request policy for batch submissions
//!
//! Every chunk is submitted under a `RequestPolicy`: a per-attempt timeout
//! and a bounded exponential-backoff retry policy. Retries stay inside one
//! chunk execution; nothing is retried across flushes.
//!
//! ```text
//! attempt 1: immediate
//! attempt 2: wait initial_backoff
//! attempt 3: wait initial_backoff * multiplier
//! ...        capped at max_backoff
//! ```
//!
//! Only transient store errors (`StoreError::is_retryable`) are retried.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

/// Exponential backoff settings.
///
/// `backoff(attempt) = min(initial_backoff * backoff_multiplier^attempt, max_backoff)`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Backoff before retry number `retry` (0-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(retry as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }
}

/// Policy applied to one batch submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPolicy {
    /// Per-attempt timeout; `None` waits as long as the store does
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
        }
    }
}

impl RequestPolicy {
    /// One attempt, no timeout.
    pub fn no_retry() -> Self {
        Self {
            timeout: None,
            retry: RetryPolicy::none(),
        }
    }
}

/// Diagnostics context handed to the store with every attempt.
#[derive(Debug, Clone, Serialize)]
pub struct OperationContext {
    /// Shared by all attempts of one chunk
    pub client_request_id: Uuid,
    pub partition_key: String,
    pub chunk_index: usize,
    /// 1-based attempt number
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(partition_key: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            client_request_id: Uuid::new_v4(),
            partition_key: partition_key.into(),
            chunk_index,
            attempt: 1,
            started_at: Utc::now(),
        }
    }
}

/// Result of running an operation under a request policy.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, StoreError>,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Run `operation` under `policy`, retrying transient failures with backoff.
///
/// The operation receives a copy of `context` with `attempt` set for each try.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RequestPolicy,
    context: &OperationContext,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut(OperationContext) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut retry = 0;

    loop {
        let mut attempt_context = context.clone();
        attempt_context.attempt = retry + 1;

        let result = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, operation(attempt_context)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
            },
            None => operation(attempt_context).await,
        };

        match result {
            Ok(value) => {
                if retry > 0 {
                    debug!(
                        request_id = %context.client_request_id,
                        attempts = retry + 1,
                        "Batch succeeded after retry"
                    );
                }
                return Attempted {
                    result: Ok(value),
                    attempts: retry + 1,
                };
            }
            Err(err) if err.is_retryable() && retry < policy.retry.max_retries => {
                let backoff = policy.retry.backoff(retry);
                warn!(
                    request_id = %context.client_request_id,
                    partition_key = %context.partition_key,
                    chunk = context.chunk_index,
                    attempt = retry + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retryable batch failure"
                );
                tokio::time::sleep(backoff).await;
                retry += 1;
            }
            Err(err) => {
                return Attempted {
                    result: Err(err),
                    attempts: retry + 1,
                };
            }
        }
    }
}
