// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backoff schedules for Kubernetes API access.
//!
//! Two schedules are used:
//!
//! - [`default_backoff`] for reads that may hit transient API server errors
//!   (429, 5xx, connection failures). See [`retry_api_call`].
//! - [`conflict_backoff`] for read-modify-write loops that lose an optimistic
//!   concurrency race. The caller bounds the number of attempts.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const API_INITIAL_INTERVAL: Duration = Duration::from_millis(100);
const API_MAX_INTERVAL: Duration = Duration::from_secs(30);
const API_MAX_ELAPSED: Duration = Duration::from_secs(300);

const CONFLICT_INITIAL_INTERVAL: Duration = Duration::from_millis(50);
const CONFLICT_MAX_INTERVAL: Duration = Duration::from_secs(2);

const MULTIPLIER: f64 = 2.0;

/// Jitter applied to every interval (±10%)
const JITTER: f64 = 0.1;

/// Doubling backoff with jitter and an optional overall deadline.
pub struct ExponentialBackoff {
    /// Interval the next call to [`Self::next_backoff`] is based on
    pub current_interval: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// `None` means the schedule never runs out
    pub max_elapsed_time: Option<Duration>,
    started: Instant,
}

impl ExponentialBackoff {
    fn new(initial: Duration, max: Duration, max_elapsed_time: Option<Duration>) -> Self {
        Self {
            current_interval: initial,
            initial_interval: initial,
            max_interval: max,
            max_elapsed_time,
            started: Instant::now(),
        }
    }

    /// Next delay to sleep, or `None` once the deadline has passed.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self
            .max_elapsed_time
            .is_some_and(|limit| self.started.elapsed() >= limit)
        {
            return None;
        }

        let base = self.current_interval;
        self.current_interval = base.mul_f64(MULTIPLIER).min(self.max_interval);

        let spread = base.as_secs_f64() * JITTER;
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
        Some(Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0)))
    }
}

/// 100ms doubling up to 30s, giving up after 5 minutes.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(API_INITIAL_INTERVAL, API_MAX_INTERVAL, Some(API_MAX_ELAPSED))
}

/// 50ms doubling up to 2s, with no deadline.
#[must_use]
pub fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(CONFLICT_INITIAL_INTERVAL, CONFLICT_MAX_INTERVAL, None)
}

/// Run a Kubernetes API call, retrying transient failures on [`default_backoff`].
///
/// Client errors other than 429 fail on the first attempt.
///
/// # Errors
///
/// Returns the last error once it is not retryable or the schedule runs out.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client};
/// use dbop::crd::DatabaseCluster;
/// use dbop::reconcilers::retry::retry_api_call;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<DatabaseCluster> = Api::namespaced(client, "analytics");
///
/// let cluster = retry_api_call(|| api.get_opt("db"), "get DatabaseCluster analytics/db").await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                debug!(operation = operation_name, attempt, "Kubernetes API call succeeded");
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_retryable_error(&err) {
            debug!(operation = operation_name, error = %err, "Kubernetes API call failed, not retrying");
            return Err(err.into());
        }

        let Some(delay) = backoff.next_backoff() else {
            error!(
                operation = operation_name,
                attempt,
                elapsed = ?start.elapsed(),
                error = %err,
                "Giving up on Kubernetes API call"
            );
            return Err(anyhow!(
                "{operation_name} failed after {attempt} attempts: {err}"
            ));
        };

        warn!(
            operation = operation_name,
            attempt,
            retry_after = ?delay,
            error = %err,
            "Transient Kubernetes API error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Rate limiting, server errors and transport failures are transient.
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(status) => status.code == 429 || (500..600).contains(&status.code),
        kube::Error::Service(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
