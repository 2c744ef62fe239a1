//! Retry with exponential backoff for backend round trips.
//!
//! A [`RetryPolicy`] is shared by every collection of a store. Each logical operation
//! gets its own [`RetryState`]; nothing carries over between operations. Sleeping is
//! delegated to an injected [`Sleeper`] so tests can run the loop without a clock.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{error, warn};

use crate::{
    config::RetryConfig,
    error::{DatastoreError, DatastoreResult},
};

/// Upper bound of a single backoff delay.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Source of delays between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = fn(&DatastoreError) -> bool;

/// Bounded exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    retryable: RetryPredicate,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("multiplier", &self.multiplier)
            .field("max_backoff", &self.max_backoff)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier.max(1.0),
            max_backoff: Duration::from_millis(config.max_backoff_ms).min(MAX_RETRY_BACKOFF),
            retryable: DatastoreError::is_transient,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the delay cap. It never exceeds [`MAX_RETRY_BACKOFF`].
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff.min(MAX_RETRY_BACKOFF);
        self
    }

    pub fn with_retryable(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_backoff.as_secs_f64() * factor;

        if !delay.is_finite() || delay >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Non-retryable errors are returned unchanged. Exhaustion is reported as
    /// [`DatastoreError::SearchRetry`] wrapping the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> DatastoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatastoreResult<T>>,
    {
        let mut state = RetryState::default();

        loop {
            state.attempts += 1;

            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !(self.retryable)(&error) {
                return Err(error);
            }

            if state.attempts >= self.max_attempts {
                error!(
                    operation,
                    attempts = state.attempts,
                    waited = ?state.waited,
                    %error,
                    "retries exhausted"
                );

                return Err(DatastoreError::SearchRetry {
                    attempts: state.attempts,
                    source: Box::new(error),
                });
            }

            let delay = self.backoff(state.attempts);
            warn!(operation, attempt = state.attempts, ?delay, %error, "retrying after transient error");

            state.waited += delay;
            self.sleeper.sleep(delay).await;
        }
    }

    /// [`run`](Self::run) with a deadline covering every attempt and every backoff.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`DatastoreError::Timeout`] once `timeout` elapses.
    pub async fn run_within<T, F, Fut>(&self, operation: &str, timeout: Option<Duration>, attempt: F) -> DatastoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatastoreResult<T>>,
    {
        within(operation, timeout, self.run(operation, attempt)).await
    }
}

/// Awaits a single backend call, failing with [`DatastoreError::Timeout`] once `timeout`
/// elapses.
pub(crate) async fn within<T>(
    operation: &str,
    timeout: Option<Duration>,
    call: impl Future<Output = DatastoreResult<T>>,
) -> DatastoreResult<T> {
    match timeout {
        Some(after) => tokio::time::timeout(after, call)
            .await
            .map_err(|_| DatastoreError::Timeout { operation: operation.to_string(), after })?,
        None => call.await,
    }
}

/// Counters of one logical operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    /// Sum of every delay slept so far.
    pub waited: Duration,
}
