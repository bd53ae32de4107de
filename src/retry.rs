//! Bounded exponential backoff.
//!
//! [`RetryPolicy::run`] drives an async operation until it succeeds, fails
//! with a non-retryable error, or runs out of retries. Backoff waits use
//! `tokio::time::sleep`, so they never block other tasks and are cancelled
//! when the caller drops the future.

use std::future::Future;
use std::time::Duration;

use crate::config::ConfigError;
use crate::error::{DatabaseError, ErrorCategory};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default multiplier applied to the delay after each retry.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Decides which failures are worth another attempt.
#[derive(Debug, Clone)]
pub enum RetryOn {
    /// Retry failures whose category is in the set.
    Categories(Vec<ErrorCategory>),
    /// Custom predicate.
    Custom(fn(&DatabaseError) -> bool),
}

impl Default for RetryOn {
    fn default() -> Self {
        Self::Categories(vec![ErrorCategory::Connection])
    }
}

impl RetryOn {
    /// Whether `error` should trigger a retry.
    pub fn should_retry(&self, error: &DatabaseError) -> bool {
        match self {
            Self::Categories(categories) => categories.contains(&error.category()),
            Self::Custom(predicate) => predicate(error),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug)]
struct RetryState {
    attempts_made: u32,
    current_delay: Duration,
}

impl RetryState {
    fn advance(&mut self, factor: f64) {
        self.attempts_made += 1;
        self.current_delay = Duration::try_from_secs_f64(self.current_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
    }
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries after the first attempt.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retry_on: RetryOn::default(),
        }
    }

    /// Set the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set which failures are retried.
    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Maximum retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Delay multiplier.
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Validate the policy.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the initial delay is zero or
    /// the backoff factor is below 1 or not finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ValidationError(
                "retry initial_delay must be positive".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry backoff_factor must be a finite number >= 1, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut state = RetryState {
            attempts_made: 0,
            current_delay: self.initial_delay,
        };
        while state.attempts_made < self.max_retries {
            total = total.saturating_add(state.current_delay);
            state.advance(self.backoff_factor);
        }
        total
    }

    /// Run `attempt` under this policy.
    ///
    /// `operation` names the call in log output. The closure is invoked once
    /// per attempt; at most `max_retries + 1` attempts are made.
    ///
    /// # Errors
    /// - The first non-retryable error, unchanged.
    /// - `DatabaseError::RetryExhausted` wrapping the last error when a
    ///   retryable failure recurs after the final retry.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let mut state = RetryState {
            attempts_made: 0,
            current_delay: self.initial_delay,
        };

        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.retry_on.should_retry(&err) {
                tracing::error!("{} failed with non-retryable error: {}", operation, err);
                return Err(err);
            }

            if state.attempts_made >= self.max_retries {
                tracing::error!(
                    "{}: retry exhausted after {} retries: {}",
                    operation,
                    self.max_retries,
                    err
                );
                return Err(DatabaseError::RetryExhausted {
                    attempts: state.attempts_made + 1,
                    last: Box::new(err),
                });
            }

            let delay = state.current_delay;
            state.advance(self.backoff_factor);
            tracing::warn!(
                "{}: retryable error: {}. Retrying in {:.2}s (attempt {}/{})",
                operation,
                err,
                delay.as_secs_f64(),
                state.attempts_made,
                self.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }
}
