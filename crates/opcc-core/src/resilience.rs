// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Resilience policies: retry with backoff in front of per-target circuit breakers.
//!
//! ```text
//!   caller ──▶ ExponentialBackoff ──▶ CircuitBreaker[target] ──▶ operation
//!                 ▲      │                    │
//!                 │      │ transient error    │ Open / HalfOpenAtCapacity
//!                 └──────┘                    ▼
//!                  sleep (cancellable)    ClientError::CircuitOpen (not retried)
//! ```
//!
//! Three independent profiles exist: `connection` for session establishment,
//! `server_communication` for reads and history queries, and `generic` for
//! everything else (outbound publishing). Each keeps one breaker per target,
//! so a failing server never trips another server's breaker.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitError, CircuitState,
    FailurePredicate,
};
use crate::error::{ClientError, ClientResult};
use crate::retry::{ExponentialBackoff, RetryConfig, RetryStrategy};

// =============================================================================
// Configuration
// =============================================================================

/// Which resilience profile a policy implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfile {
    /// Session establishment.
    Connection,
    /// Reads and history queries against a server.
    ServerCommunication,
    /// Everything else, including outbound publishing.
    Generic,
}

impl fmt::Display for PolicyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::ServerCommunication => write!(f, "server_communication"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Retry and breaker parameters of one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicySettings {
    /// Retry parameters.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Breaker parameters.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Parameters of all three profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    /// Connection profile.
    #[serde(default)]
    pub connection: PolicySettings,
    /// Server-communication profile.
    #[serde(default)]
    pub server_communication: PolicySettings,
    /// Generic profile.
    #[serde(default)]
    pub generic: PolicySettings,
}

// =============================================================================
// Failure predicate
// =============================================================================

/// Counts only transient errors toward opening a breaker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientFailure;

impl FailurePredicate<ClientError> for TransientFailure {
    fn is_failure(&self, error: &ClientError) -> bool {
        error.is_transient()
    }
}

fn unwrap_circuit(target: &str, err: CircuitError<ClientError>) -> ClientError {
    match err {
        CircuitError::Inner(e) => e,
        CircuitError::Open | CircuitError::HalfOpenAtCapacity => ClientError::circuit_open(target),
    }
}

// =============================================================================
// ResiliencePolicy
// =============================================================================

/// A retry strategy plus lazily created per-target circuit breakers.
pub struct ResiliencePolicy {
    profile: PolicyProfile,
    settings: PolicySettings,
    strategy: ExponentialBackoff,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl ResiliencePolicy {
    /// Creates a policy for `profile`.
    pub fn new(profile: PolicyProfile, settings: PolicySettings) -> Self {
        Self {
            profile,
            strategy: ExponentialBackoff::new(settings.retry.clone()),
            settings,
            breakers: DashMap::new(),
        }
    }

    /// Returns the profile.
    pub fn profile(&self) -> PolicyProfile {
        self.profile
    }

    /// Returns the settings.
    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Returns the breaker for `target`, creating it on first use.
    pub fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    format!("{}:{}", self.profile, target),
                    self.settings.circuit_breaker.clone(),
                ))
            })
            .clone()
    }

    /// Current breaker state for `target`; closed if never used.
    pub fn breaker_state(&self, target: &str) -> CircuitState {
        self.breakers
            .get(target)
            .map(|b| b.current_state())
            .unwrap_or_default()
    }

    /// Metrics for every breaker created so far.
    pub fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        self.breakers.iter().map(|b| b.metrics()).collect()
    }

    /// Runs `operation` against `target` with retries and the target's breaker.
    ///
    /// Non-transient errors and breaker rejections are returned immediately.
    pub async fn execute<F, Fut, T>(
        &self,
        target: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> ClientResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ClientResult<T>> + Send,
        T: Send,
    {
        let breaker = self.breaker(target);

        self.strategy
            .execute(cancel, || {
                let attempt = operation();
                let breaker = breaker.clone();
                async move {
                    breaker
                        .call_with_predicate(|| attempt, &TransientFailure)
                        .await
                        .map_err(|e| unwrap_circuit(target, e))
                }
            })
            .await
    }

    /// Runs `operation` once through the target's breaker, without retries.
    pub async fn execute_once<Fut, T>(
        &self,
        target: &str,
        cancel: &CancellationToken,
        operation: Fut,
    ) -> ClientResult<T>
    where
        Fut: Future<Output = ClientResult<T>>,
    {
        let breaker = self.breaker(target);
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = breaker.call_with_predicate(|| operation, &TransientFailure) => {
                result.map_err(|e| unwrap_circuit(target, e))
            }
        }
    }
}

impl fmt::Debug for ResiliencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePolicy")
            .field("profile", &self.profile)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

// =============================================================================
// ResiliencePolicies
// =============================================================================

/// The three profiles, shared across the client core.
#[derive(Debug, Clone)]
pub struct ResiliencePolicies {
    /// Session establishment.
    pub connection: Arc<ResiliencePolicy>,
    /// Reads, history queries and writes.
    pub server_communication: Arc<ResiliencePolicy>,
    /// Outbound publishing and miscellany.
    pub generic: Arc<ResiliencePolicy>,
}

impl ResiliencePolicies {
    /// Builds all three policies from configuration.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            connection: Arc::new(ResiliencePolicy::new(
                PolicyProfile::Connection,
                config.connection.clone(),
            )),
            server_communication: Arc::new(ResiliencePolicy::new(
                PolicyProfile::ServerCommunication,
                config.server_communication.clone(),
            )),
            generic: Arc::new(ResiliencePolicy::new(
                PolicyProfile::Generic,
                config.generic.clone(),
            )),
        }
    }
}

impl Default for ResiliencePolicies {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(retries: u32, threshold: u32) -> ResiliencePolicy {
        ResiliencePolicy::new(
            PolicyProfile::ServerCommunication,
            PolicySettings {
                retry: RetryConfig::default()
                    .with_max_retries(retries)
                    .with_initial_delay(Duration::from_millis(10)),
                circuit_breaker: CircuitBreakerConfig::new(threshold, Duration::from_secs(30)),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let policy = policy(2, 10);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = policy
            .execute("srv-a", &cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ClientError::session_closed("dropped"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let policy = policy(5, 10);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: ClientResult<()> = policy
            .execute("srv-a", &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::address_not_found("ns=2;s=Missing")) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::AddressNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(policy.breaker("srv-a").failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_per_target() {
        let policy = policy(0, 2);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let _: ClientResult<()> = policy
                .execute("srv-a", &cancel, || async { Err(ClientError::communication("down")) })
                .await;
        }
        assert_eq!(policy.breaker_state("srv-a"), CircuitState::Open);
        assert_eq!(policy.breaker_state("srv-b"), CircuitState::Closed);

        let rejected: ClientResult<()> = policy
            .execute("srv-a", &cancel, || async { Ok(()) })
            .await;
        assert!(matches!(rejected, Err(ClientError::CircuitOpen { .. })));

        let ok = policy.execute("srv-b", &cancel, || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_execute_once_never_retries() {
        let policy = policy(5, 10);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: ClientResult<()> = policy
            .execute_once("srv-a", &cancel, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::timeout(Duration::from_secs(1)))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let policy = policy(3, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = policy.execute("srv-a", &cancel, || async { Ok(1) }).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_does_not_wedge_the_breaker() {
        let policy = policy(0, 1);
        let cancel = CancellationToken::new();

        let _: ClientResult<()> = policy
            .execute_once("srv-a", &cancel, async { Err(ClientError::communication("down")) })
            .await;
        assert_eq!(policy.breaker_state("srv-a"), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(31)).await;

        let trial_cancel = CancellationToken::new();
        let trigger = trial_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let trial: ClientResult<()> = policy
            .execute_once("srv-a", &trial_cancel, std::future::pending())
            .await;
        assert!(matches!(trial, Err(ClientError::Cancelled)));
        assert_eq!(policy.breaker_state("srv-a"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let ok = policy.execute_once("srv-a", &cancel, async { Ok(5) }).await;
        assert_eq!(ok.unwrap(), 5);
        assert_eq!(policy.breaker_state("srv-a"), CircuitState::Closed);
    }
}
