//! Async utilities and patterns
//!
//! Provides the retry policy, the run-with-deadline combinator applied to every
//! external call, and the settle-all join used for partial-failure fan-out.

use crate::error::{DelveError, DelveResult};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: usize,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier (1.0 keeps the delay fixed)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy without jitter
    pub fn fixed(max_attempts: usize, delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);
        let actual = if self.jitter {
            let jitter_factor = 0.1;
            let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
            capped * (1.0 + jitter)
        } else {
            capped
        };
        Duration::from_millis(actual.max(0.0) as u64)
    }

    /// Worst-case time spent sleeping between attempts
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| {
                let exponent = attempt.saturating_sub(1) as i32;
                let base = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
                Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
            })
            .sum()
    }
}

/// Retry an async operation, retrying every failure
pub async fn retry_async<F, Fut, T, E>(operation: F, policy: &RetryPolicy, operation_name: &str) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_async_if(operation, policy, operation_name, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts the error.
///
/// The closure receives the 1-based attempt number.
pub async fn retry_async_if<F, Fut, T, E, P>(
    mut operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = policy.max_attempts,
            "Attempting operation"
        );

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %err,
                        "Operation failed with a non-retryable error"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %err,
                        "Operation failed after all retry attempts"
                    );
                    return Err(err);
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Race a future against a timer
pub async fn with_deadline<F, T>(budget: Duration, future: F, operation_name: &str) -> DelveResult<T>
where
    F: Future<Output = T>,
{
    match timeout(budget, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(DelveError::timeout(operation_name, budget.as_millis() as u64)),
    }
}

/// [`with_deadline`] for futures that already return a [`DelveResult`]
pub async fn try_with_deadline<F, T>(budget: Duration, future: F, operation_name: &str) -> DelveResult<T>
where
    F: Future<Output = DelveResult<T>>,
{
    with_deadline(budget, future, operation_name).await?
}

/// Wait for every branch to finish, success or failure, and return the
/// outcomes in input order.
pub async fn settle_all<I, F, T>(futures: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    settle_all_with_progress(futures, |_, _| {}).await
}

/// Like [`settle_all`], calling `on_settle(index, settled_count)` as each branch finishes
pub async fn settle_all_with_progress<I, F, T, C>(futures: I, mut on_settle: C) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
    C: FnMut(usize, usize),
{
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, future)| async move { (index, future.await) })
        .collect();

    let mut slots: Vec<Option<T>> = (0..pending.len()).map(|_| None).collect();
    let mut settled = 0;

    while let Some((index, outcome)) = pending.next().await {
        settled += 1;
        slots[index] = Some(outcome);
        on_settle(index, settled);
    }

    slots.into_iter().flatten().collect()
}

/// Absolute point in time that bounds a sequence of stages
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Shorten a stage budget so it never outlives the deadline
    pub fn cap(&self, budget: Duration) -> Duration {
        budget.min(self.remaining())
    }
}
