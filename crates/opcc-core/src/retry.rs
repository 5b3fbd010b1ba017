// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry strategies for transient client failures.
//!
//! - [`NoRetry`]: fail on the first error
//! - [`FixedDelay`]: constant delay between retries
//! - [`ExponentialBackoff`]: `initial * multiplier^(n-1)` capped at `max_delay`
//!
//! Strategies only ever retry errors for which [`ClientError::is_transient`]
//! holds. `max_retries` counts retries, so an operation runs at most
//! `max_retries + 1` times. Backoff sleeps stop early on cancellation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

// =============================================================================
// Retry Configuration
// =============================================================================

/// Retry parameters of one resilience profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0); each delay varies by up to ±factor.
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets the retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter factor, clamped into 0.0..=1.0.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

// =============================================================================
// Retry Decision
// =============================================================================

/// Decision on whether to retry an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry(Duration),
    /// Give up and return the error.
    DoNotRetry,
}

// =============================================================================
// Retry Strategy Trait
// =============================================================================

/// Decides when and how long to wait before retrying.
#[async_trait]
pub trait RetryStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &str;

    /// Decides after the `attempt`-th failure (1-based).
    fn should_retry(&self, error: &ClientError, attempt: u32) -> RetryDecision;

    /// Runs `operation` until it succeeds, the strategy gives up, or `cancel` fires.
    async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ClientError>> + Send,
        T: Send,
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                result = operation() => result,
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.should_retry(&error, attempt) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        strategy = %self.name(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying operation"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry => return Err(error),
            }
        }
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

#[async_trait]
impl RetryStrategy for NoRetry {
    fn name(&self) -> &str {
        "no_retry"
    }

    fn should_retry(&self, _error: &ClientError, _attempt: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

/// Waits `initial_delay` between every retry.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    config: RetryConfig,
}

impl FixedDelay {
    /// Creates a fixed delay strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RetryStrategy for FixedDelay {
    fn name(&self) -> &str {
        "fixed_delay"
    }

    fn should_retry(&self, error: &ClientError, attempt: u32) -> RetryDecision {
        if attempt > self.config.max_retries || !error.is_transient() {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry(apply_jitter(self.config.initial_delay, self.config.jitter))
    }
}

/// Exponentially growing delays.
///
/// Delay formula: `min(initial_delay * multiplier^(attempt-1), max_delay)`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates an exponential backoff strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `attempt`, without jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplied = base * self.config.multiplier.max(1.0).powi(exponent);
        let capped = multiplied.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[async_trait]
impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn should_retry(&self, error: &ClientError, attempt: u32) -> RetryDecision {
        if attempt > self.config.max_retries || !error.is_transient() {
            return RetryDecision::DoNotRetry;
        }
        let delay = apply_jitter(self.calculate_delay(attempt), self.config.jitter);
        RetryDecision::Retry(delay)
    }
}

/// Randomizes `duration` by up to ±`jitter_factor`.
pub fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let millis = duration.as_millis() as f64;
    let range = millis * jitter_factor.min(1.0);
    let offset = (rand::random::<f64>() * 2.0 - 1.0) * range;
    Duration::from_millis((millis + offset).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn backoff(retries: u32) -> ExponentialBackoff {
        ExponentialBackoff::new(
            RetryConfig::default()
                .with_max_retries(retries)
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(500)),
        )
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let strategy = backoff(10);
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(strategy.calculate_delay(4), Duration::from_millis(500));
        assert_eq!(strategy.calculate_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let strategy = backoff(3);
        assert!(matches!(
            strategy.should_retry(&ClientError::communication("reset"), 1),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            strategy.should_retry(&ClientError::configuration("bad"), 1),
            RetryDecision::DoNotRetry
        );
        assert_eq!(
            strategy.should_retry(&ClientError::communication("reset"), 4),
            RetryDecision::DoNotRetry
        );
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = apply_jitter(Duration::from_millis(1000), 0.2);
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
        assert_eq!(apply_jitter(Duration::from_millis(50), 0.0), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_runs_retries_plus_one() {
        let strategy = backoff(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let cancel = CancellationToken::new();

        let result: Result<(), _> = strategy
            .execute(&cancel, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::timeout(Duration::from_secs(1)))
                }
            })
            .await;

        assert!(matches!(result, Err(ClientError::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_succeeds_after_transient_failures() {
        let strategy = FixedDelay::new(RetryConfig::default().with_max_retries(5));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let cancel = CancellationToken::new();

        let result = strategy
            .execute(&cancel, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ClientError::communication("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_stops_on_cancel() {
        let strategy = ExponentialBackoff::new(
            RetryConfig::default()
                .with_max_retries(10)
                .with_initial_delay(Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = strategy
            .execute(&cancel, || async { Err(ClientError::communication("down")) })
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_attempt() {
        let strategy = backoff(3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = strategy
            .execute(&cancel, || std::future::pending::<Result<(), ClientError>>())
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}
