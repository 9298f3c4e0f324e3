//! Retry executor with exponential backoff.
//!
//! Retries retryable errors with exponentially-backed, optionally jittered
//! delays, honoring provider retry-after hints and cancellation.

use rand::Rng;
use relay_core::events::{EventBus, EventRecord};
use relay_core::{BindingKey, CancelToken, ErrorKind, RelayError, RequestId, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Jitter applied to computed backoff delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    /// Sleep the raw exponential delay.
    None,
    /// Sleep a uniform random duration in `[0, raw]`.
    #[default]
    Full,
}

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for the first backoff.
    pub base_delay: Duration,
    /// Ceiling for any single backoff.
    pub max_delay: Duration,
    /// Jitter mode.
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: JitterMode::Full,
        }
    }
}

/// Per-call context threaded through the executor for events and
/// cancellation.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Binding the call is addressed to.
    pub binding: BindingKey,
    /// Call identifier.
    pub request_id: RequestId,
    /// Call-level cancellation scope.
    pub cancel: CancelToken,
    /// Sink for retry events.
    pub events: EventBus,
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Raw exponential delay for a 1-indexed attempt, before jitter.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.config.base_delay.as_millis() as f64 * 2f64.powi(exponent as i32);
        let capped = raw.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Jittered delay for a 1-indexed attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_for_attempt(attempt);
        match self.config.jitter {
            JitterMode::None => raw,
            JitterMode::Full => {
                let raw_ms = raw.as_millis() as u64;
                if raw_ms == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=raw_ms))
            }
        }
    }

    /// Whether a failed 1-indexed attempt should be retried.
    ///
    /// A `BreakerOpen` rejection is treated as retryable only when the
    /// breaker's reopen hint elapses within the next backoff; otherwise the
    /// call would burn attempts against a circuit that cannot close in time.
    #[must_use]
    pub fn should_retry(&self, error: &RelayError, attempt: u32) -> bool {
        if attempt >= self.config.max_attempts.max(1) {
            return false;
        }
        match error.kind {
            ErrorKind::BreakerOpen => error
                .retry_after
                .is_some_and(|hint| hint <= self.base_delay_for_attempt(attempt)),
            kind => kind.is_retryable(),
        }
    }

    /// Backoff to sleep after a failed 1-indexed attempt, honoring any
    /// retry-after hint as a floor.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, error: &RelayError) -> Duration {
        let mut delay = self.delay_for_attempt(attempt);
        if let Some(retry_after) = error.retry_after {
            delay = delay.max(retry_after);
        }
        delay
    }

    /// Invoke `op` until it succeeds, a non-retryable error occurs, or
    /// attempts are exhausted.
    ///
    /// # Errors
    /// Returns the final attempt's error unchanged (with the attempt count
    /// stamped), or the classified cancellation error when `cx.cancel` fires
    /// during a backoff sleep.
    pub async fn execute<T, F, Fut>(&self, cx: &RetryContext, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            if let Some(kind) = cx.cancel.cause() {
                return Err(RelayError::from_cancel(kind)
                    .with_binding(cx.binding.clone())
                    .with_request_id(cx.request_id)
                    .with_attempts(attempt.saturating_sub(1)));
            }

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(binding = %cx.binding, attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return Err(error.with_attempts(attempt));
                    }

                    let delay = self.backoff_delay(attempt, &error);

                    cx.events.emit(EventRecord::CallRetry {
                        binding: cx.binding.clone(),
                        request_id: cx.request_id,
                        attempt,
                        wait_ms: delay.as_millis() as u64,
                        error: error.kind,
                    });
                    warn!(
                        binding = %cx.binding,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after error"
                    );

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        kind = cx.cancel.cancelled() => {
                            return Err(RelayError::from_cancel(kind)
                                .with_binding(cx.binding.clone())
                                .with_request_id(cx.request_id)
                                .with_attempts(attempt));
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }
}

/// Builder for retry policy
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total attempts, including the first
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    /// Set base delay
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set max delay
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set jitter mode
    #[must_use]
    pub fn jitter(mut self, jitter: JitterMode) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Build the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy::new(self.config)
    }
}
