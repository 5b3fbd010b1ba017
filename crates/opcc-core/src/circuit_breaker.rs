// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Lock-free circuit breaker.
//!
//! One breaker guards one target (a server id or a sink name). State and
//! counters live in a single `AtomicU64` so concurrent callers never block.
//!
//! # State Transitions
//!
//! ```text
//!                    success
//!      ┌─────────────────────────────┐
//!      │                             │
//!      ▼                             │
//!   ┌──────┐   failure threshold  ┌──────┐  break elapsed  ┌─────────┐
//!   │Closed│ ────────────────────▶│ Open │ ───────────────▶│HalfOpen │
//!   └──────┘                      └──────┘                 └─────────┘
//!      ▲                              ▲       failure           │
//!      │                              └─────────────────────────┤
//!      └────────────────────────────────────────────────────────┘
//!                        success in half-open
//! ```
//!
//! While open, every call is rejected with [`CircuitError::Open`] until the
//! break duration has elapsed. The first caller after that becomes the trial
//! call; with the default `half_open_max_calls = 1` every other caller gets
//! [`CircuitError::HalfOpenAtCapacity`] until the trial completes. A trial
//! whose future is dropped before it finishes reopens the circuit and
//! restarts the break.
//!
//! # Example
//!
//! ```rust,ignore
//! use opcc_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let cb = CircuitBreaker::new("plc", CircuitBreakerConfig::default());
//! let value = cb.call(|| async { Ok::<_, std::io::Error>(42) }).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

// =============================================================================
// CircuitState
// =============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls fail fast.
    Open,
    /// A trial call is probing the target.
    HalfOpen,
}

impl CircuitState {
    /// Returns the numeric representation.
    pub const fn as_u8(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is admitted.
    #[serde(default = "default_break_duration", with = "humantime_serde")]
    pub break_duration: Duration,

    /// Trial calls admitted while half-open.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_break_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_half_open_max_calls() -> u32 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            break_duration: default_break_duration(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a configuration with the given threshold and break duration.
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            failure_threshold,
            break_duration,
            ..Default::default()
        }
    }
}

// =============================================================================
// Circuit Breaker Error
// =============================================================================

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not executed.
    #[error("Circuit breaker is open")]
    Open,

    /// The circuit is half-open and its trial capacity is used up.
    #[error("Circuit breaker is half-open and at capacity")]
    HalfOpenAtCapacity,

    /// The operation ran and failed.
    #[error("Inner operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    /// Returns `true` if the call was rejected without running.
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitError::Open | CircuitError::HalfOpenAtCapacity)
    }

    /// Consumes self and returns the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// Failure Predicate
// =============================================================================

/// Decides whether an error counts toward opening the circuit.
pub trait FailurePredicate<E>: Send + Sync {
    /// Returns `true` if the error should be counted as a failure.
    fn is_failure(&self, error: &E) -> bool;
}

/// Counts every error as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailurePredicate;

impl<E> FailurePredicate<E> for DefaultFailurePredicate {
    fn is_failure(&self, _error: &E) -> bool {
        true
    }
}

// =============================================================================
// State Encoding
// =============================================================================

/// Packed breaker state.
///
/// Layout:
/// - Bits 0-7: state (0=Closed, 1=Open, 2=HalfOpen)
/// - Bits 8-23: failure count
/// - Bits 24-39: success count
/// - Bits 40-55: half-open attempt count
#[derive(Debug, Clone, Copy)]
struct EncodedState {
    state: CircuitState,
    failure_count: u16,
    success_count: u16,
    half_open_attempts: u16,
}

impl EncodedState {
    fn new(state: CircuitState) -> Self {
        Self {
            state,
            failure_count: 0,
            success_count: 0,
            half_open_attempts: 0,
        }
    }

    fn encode(&self) -> u64 {
        (self.state.as_u8() as u64)
            | ((self.failure_count as u64) << 8)
            | ((self.success_count as u64) << 24)
            | ((self.half_open_attempts as u64) << 40)
    }

    fn decode(value: u64) -> Self {
        Self {
            state: CircuitState::from((value & 0xFF) as u8),
            failure_count: ((value >> 8) & 0xFFFF) as u16,
            success_count: ((value >> 24) & 0xFFFF) as u16,
            half_open_attempts: ((value >> 40) & 0xFFFF) as u16,
        }
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// A lock-free circuit breaker for one target.
///
/// Opens after `failure_threshold` consecutive counted failures and closes
/// again once `half_open_max_calls` trial calls have succeeded.
pub struct CircuitBreaker {
    target: String,
    state: AtomicU64,
    /// Reference point for `opened_at`.
    epoch: Instant,
    /// Milliseconds since `epoch` when the circuit last opened, plus one; 0 = never.
    opened_at: AtomicU64,
    /// Unix millis of the last counted failure; 0 = never.
    last_failure_unix_ms: AtomicU64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a breaker for `target`.
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            state: AtomicU64::new(EncodedState::new(CircuitState::Closed).encode()),
            epoch: Instant::now(),
            opened_at: AtomicU64::new(0),
            last_failure_unix_ms: AtomicU64::new(0),
            config,
        }
    }

    /// Executes `f` through the breaker, counting every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_predicate(f, &DefaultFailurePredicate).await
    }

    /// Executes `f` through the breaker, counting only errors the predicate accepts.
    ///
    /// An error the predicate rejects means the target answered, so it is
    /// recorded as a success for state purposes.
    pub async fn call_with_predicate<F, Fut, T, E, P>(
        &self,
        f: F,
        predicate: &P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FailurePredicate<E> + ?Sized,
    {
        let permit = self.acquire::<E>()?;

        match f().await {
            Ok(value) => {
                permit.succeeded();
                Ok(value)
            }
            Err(e) => {
                if predicate.is_failure(&e) {
                    permit.failed();
                } else {
                    permit.succeeded();
                }
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Admits or rejects a call, moving Open to HalfOpen when the break elapsed.
    fn acquire<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        loop {
            let encoded = self.state.load(Ordering::SeqCst);
            let current = EncodedState::decode(encoded);

            match current.state {
                CircuitState::Closed => return Ok(Permit::new(self, None)),

                CircuitState::Open => {
                    if !self.break_elapsed() {
                        tracing::debug!(target_name = %self.target, "Circuit open, call rejected");
                        return Err(CircuitError::Open);
                    }

                    // The caller that wins the swap is the trial call.
                    let mut next = EncodedState::new(CircuitState::HalfOpen);
                    next.half_open_attempts = 1;
                    if self
                        .state
                        .compare_exchange(encoded, next.encode(), Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        self.emit_state_change(
                            CircuitState::Open,
                            CircuitState::HalfOpen,
                            &next,
                            "break duration elapsed",
                        );
                        return Ok(Permit::new(self, Some(self.opened_at.load(Ordering::SeqCst))));
                    }
                }

                CircuitState::HalfOpen => {
                    if current.half_open_attempts as u32 >= self.config.half_open_max_calls.max(1) {
                        tracing::debug!(target_name = %self.target, "Trial call in flight, call rejected");
                        return Err(CircuitError::HalfOpenAtCapacity);
                    }

                    let mut next = current;
                    next.half_open_attempts = current.half_open_attempts.saturating_add(1);
                    if self
                        .state
                        .compare_exchange(encoded, next.encode(), Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return Ok(Permit::new(self, Some(self.opened_at.load(Ordering::SeqCst))));
                    }
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        loop {
            let encoded = self.state.load(Ordering::SeqCst);
            let current = EncodedState::decode(encoded);

            let mut next = current;
            next.failure_count = 0;
            next.success_count = current.success_count.saturating_add(1);

            let closing = current.state == CircuitState::HalfOpen
                && next.success_count as u32 >= self.config.half_open_max_calls.max(1);
            if closing {
                next = EncodedState::new(CircuitState::Closed);
            }

            if self
                .state
                .compare_exchange(encoded, next.encode(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if closing {
                    self.emit_state_change(
                        CircuitState::HalfOpen,
                        CircuitState::Closed,
                        &next,
                        "trial call succeeded",
                    );
                }
                return;
            }
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.last_failure_unix_ms
            .store(Utc::now().timestamp_millis().max(1) as u64, Ordering::SeqCst);

        loop {
            let encoded = self.state.load(Ordering::SeqCst);
            let current = EncodedState::decode(encoded);

            let mut next = current;
            next.failure_count = current.failure_count.saturating_add(1);
            next.success_count = 0;

            let reason = match current.state {
                CircuitState::Closed
                    if next.failure_count as u32 >= self.config.failure_threshold.max(1) =>
                {
                    Some("failure threshold reached")
                }
                CircuitState::HalfOpen => Some("trial call failed"),
                _ => None,
            };
            if reason.is_some() {
                next = EncodedState::new(CircuitState::Open);
                next.failure_count = current.failure_count.saturating_add(1);
            }

            if self
                .state
                .compare_exchange(encoded, next.encode(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if let Some(reason) = reason {
                    self.mark_opened();
                    self.emit_state_change(current.state, CircuitState::Open, &next, reason);
                }
                return;
            }
        }
    }

    /// Reopens the circuit when a trial call ended without an outcome.
    ///
    /// `opened_at` is the opening the trial was admitted for; a later opening
    /// means another trial already settled that period.
    fn abandon_trial(&self, opened_at: u64) {
        loop {
            let encoded = self.state.load(Ordering::SeqCst);
            let current = EncodedState::decode(encoded);
            if current.state != CircuitState::HalfOpen || self.opened_at.load(Ordering::SeqCst) != opened_at {
                return;
            }

            let mut next = EncodedState::new(CircuitState::Open);
            next.failure_count = current.failure_count;
            if self
                .state
                .compare_exchange(encoded, next.encode(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.mark_opened();
                self.emit_state_change(CircuitState::HalfOpen, CircuitState::Open, &next, "trial call abandoned");
                return;
            }
        }
    }

    fn mark_opened(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.opened_at.store(elapsed + 1, Ordering::SeqCst);
    }

    fn break_elapsed(&self) -> bool {
        let opened = self.opened_at.load(Ordering::SeqCst);
        if opened == 0 {
            return true;
        }
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        now.saturating_sub(opened) >= self.config.break_duration.as_millis() as u64
    }

    fn emit_state_change(
        &self,
        from: CircuitState,
        to: CircuitState,
        state: &EncodedState,
        reason: &'static str,
    ) {
        match to {
            CircuitState::Open => tracing::warn!(
                target_name = %self.target,
                from = %from,
                failures = state.failure_count,
                reason,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                target_name = %self.target,
                "Circuit breaker half-open, admitting trial call"
            ),
            CircuitState::Closed => tracing::info!(
                target_name = %self.target,
                from = %from,
                reason,
                "Circuit breaker closed"
            ),
        }
    }

    /// Returns the guarded target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the current state.
    pub fn current_state(&self) -> CircuitState {
        EncodedState::decode(self.state.load(Ordering::SeqCst)).state
    }

    /// Returns the consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        EncodedState::decode(self.state.load(Ordering::SeqCst)).failure_count as u32
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Forces the circuit closed.
    pub fn reset(&self) {
        let old = EncodedState::decode(self.state.load(Ordering::SeqCst));
        let next = EncodedState::new(CircuitState::Closed);
        self.state.store(next.encode(), Ordering::SeqCst);
        self.opened_at.store(0, Ordering::SeqCst);
        if old.state != CircuitState::Closed {
            self.emit_state_change(old.state, CircuitState::Closed, &next, "manual reset");
        }
    }

    /// Forces the circuit open.
    pub fn trip(&self) {
        let old = EncodedState::decode(self.state.load(Ordering::SeqCst));
        let next = EncodedState::new(CircuitState::Open);
        self.state.store(next.encode(), Ordering::SeqCst);
        self.mark_opened();
        if old.state != CircuitState::Open {
            self.emit_state_change(old.state, CircuitState::Open, &next, "manual trip");
        }
    }

    /// Returns a metrics snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let decoded = EncodedState::decode(self.state.load(Ordering::SeqCst));
        let last_failure = self.last_failure_unix_ms.load(Ordering::SeqCst);

        CircuitBreakerMetrics {
            target: self.target.clone(),
            state: decoded.state,
            failure_count: decoded.failure_count as u32,
            success_count: decoded.success_count as u32,
            half_open_attempts: decoded.half_open_attempts as u32,
            last_failure_time: if last_failure > 0 {
                DateTime::from_timestamp_millis(last_failure as i64)
            } else {
                None
            },
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("state", &metrics.state)
            .field("failure_count", &metrics.failure_count)
            .finish()
    }
}

// =============================================================================
// Permit
// =============================================================================

/// An admitted call. A trial permit dropped before its outcome is recorded
/// (the call future was cancelled or timed out) reopens the circuit.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial_of: Option<u64>,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial_of: Option<u64>) -> Self {
        Self {
            breaker,
            trial_of,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let (false, Some(opened_at)) = (self.settled, self.trial_of) {
            self.breaker.abandon_trial(opened_at);
        }
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Snapshot of breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Guarded target.
    pub target: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Consecutive successes.
    pub success_count: u32,
    /// Trial calls admitted in the current half-open period.
    pub half_open_attempts: u32,
    /// Time of the last counted failure.
    pub last_failure_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn breaker(threshold: u32, break_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new("srv", CircuitBreakerConfig::new(threshold, Duration::from_millis(break_ms)))
    }

    struct OnlyTimeouts;

    impl FailurePredicate<&str> for OnlyTimeouts {
        fn is_failure(&self, error: &&str) -> bool {
            *error == "timeout"
        }
    }

    #[test]
    fn test_encoding() {
        let state = EncodedState {
            state: CircuitState::HalfOpen,
            failure_count: 7,
            success_count: 3,
            half_open_attempts: 1,
        };
        let decoded = EncodedState::decode(state.encode());
        assert_eq!(decoded.state, CircuitState::HalfOpen);
        assert_eq!(decoded.failure_count, 7);
        assert_eq!(decoded.success_count, 3);
        assert_eq!(decoded.half_open_attempts, 1);
    }

    #[test]
    fn test_failure_threshold() {
        let cb = breaker(3, 1_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(cb.metrics().last_failure_time.is_some());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(3, 1_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_break_elapses() {
        let cb = breaker(5, 10_000);
        for _ in 0..5 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(cb.current_state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(matches!(
            cb.call(|| async { Ok::<_, &str>(()) }).await,
            Err(CircuitError::Open)
        ));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.call(|| async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_trial() {
        let cb = Arc::new(breaker(1, 100));
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .call(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);

        let second = cb.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(second, Err(CircuitError::HalfOpenAtCapacity)));

        let _ = release_tx.send(());
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens() {
        let cb = breaker(1, 100);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;

        let result = cb.call(|| async { Err::<(), _>("still down") }).await;
        assert!(matches!(result, Err(CircuitError::Inner("still down"))));
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(matches!(
            cb.call(|| async { Ok::<_, &str>(()) }).await,
            Err(CircuitError::Open)
        ));
    }

    #[tokio::test]
    async fn test_predicate_filters_failures() {
        let cb = breaker(1, 1_000);

        let _ = cb
            .call_with_predicate(|| async { Err::<(), _>("rejected") }, &OnlyTimeouts)
            .await;
        assert_eq!(cb.current_state(), CircuitState::Closed);

        let _ = cb
            .call_with_predicate(|| async { Err::<(), _>("timeout") }, &OnlyTimeouts)
            .await;
        assert_eq!(cb.current_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_reopens_instead_of_blocking() {
        let cb = breaker(1, 1_000);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(2)).await;

        let trial = tokio::time::timeout(
            Duration::from_millis(10),
            cb.call(|| std::future::pending::<Result<(), &str>>()),
        )
        .await;
        assert!(trial.is_err());
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(matches!(
            cb.call(|| async { Ok::<_, &str>(()) }).await,
            Err(CircuitError::Open)
        ));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(cb.call(|| async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_closed_call_leaves_state_alone() {
        let cb = breaker(3, 1_000);
        cb.record_failure();

        let _ = tokio::time::timeout(
            Duration::from_millis(10),
            cb.call(|| std::future::pending::<Result<(), &str>>()),
        )
        .await;
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_manual_trip_and_reset() {
        let cb = CircuitBreaker::new("sink", CircuitBreakerConfig::default());

        cb.trip();
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(cb.metrics().last_failure_time.is_none());
        cb.reset();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }
}
