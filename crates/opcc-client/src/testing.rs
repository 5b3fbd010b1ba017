// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared unit-test helpers.

use std::time::Duration;

use opcc_core::circuit_breaker::CircuitBreakerConfig;
use opcc_core::resilience::{PolicySettings, ResilienceConfig, ResiliencePolicies};
use opcc_core::retry::RetryConfig;

/// Policies with `retries` retries and a 1ms backoff on every profile.
pub(crate) fn fast_policies(retries: u32) -> ResiliencePolicies {
    let settings = PolicySettings {
        retry: RetryConfig::no_retry()
            .with_max_retries(retries)
            .with_initial_delay(Duration::from_millis(1)),
        circuit_breaker: CircuitBreakerConfig::default(),
    };
    ResiliencePolicies::from_config(&ResilienceConfig {
        connection: settings.clone(),
        server_communication: settings.clone(),
        generic: settings,
    })
}
