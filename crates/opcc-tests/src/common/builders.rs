// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Fluent construction of client configurations with test-friendly defaults:
//! millisecond retry delays, fast drains and a health cycle long enough to
//! stay out of the way unless a test asks for it.

use std::time::Duration;

use opcc_config::{
    ClientConfig, MonitoredItemConfig, RateLimitConfig, ServerConnectionConfig, SubscriptionConfig,
    TagDefinition, ValidationRule,
};
use opcc_core::circuit_breaker::CircuitBreakerConfig;
use opcc_core::resilience::PolicySettings;
use opcc_core::retry::RetryConfig;
use opcc_core::types::TagId;

use super::fixtures::{ServerFixtures, TagFixtures, CLIENT_ID, PLC};

// =============================================================================
// ConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: ClientConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Empty configuration with fast test timings.
    pub fn new() -> Self {
        let mut config = ClientConfig::default();
        config.client.id = CLIENT_ID.to_string();
        config.buffer.drain_interval = Duration::from_millis(20);
        config.health.interval = Duration::from_secs(3600);
        config.shutdown.grace_period = Duration::from_secs(2);

        Self { config }.with_retries(0)
    }

    /// The reference plant: line controller, historian and alarm server with
    /// their tags, the temperature subscribed, and a maximum of 100 on the
    /// setpoint.
    pub fn plant() -> Self {
        Self::new()
            .server(ServerFixtures::plc())
            .server(ServerFixtures::historian())
            .server(ServerFixtures::alarms())
            .tags(TagFixtures::plant())
            .subscription(SubscriptionConfig::new(PLC).with_item(MonitoredItemConfig::new("boiler_temp")))
            .rule("flow_setpoint", None, Some(100.0))
    }

    /// Adds a server.
    pub fn server(mut self, server: ServerConnectionConfig) -> Self {
        self.config.servers.push(server);
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, tag: TagDefinition) -> Self {
        self.config.tags.push(tag);
        self
    }

    /// Adds tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = TagDefinition>) -> Self {
        self.config.tags.extend(tags);
        self
    }

    /// Adds a subscription.
    pub fn subscription(mut self, subscription: SubscriptionConfig) -> Self {
        self.config.subscriptions.push(subscription);
        self
    }

    /// Removes every configured subscription.
    pub fn without_subscriptions(mut self) -> Self {
        self.config.subscriptions.clear();
        self
    }

    /// Adds a write range rule.
    pub fn rule(mut self, tag_id: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.config.write.validation_rules.push(ValidationRule {
            tag_id: TagId::new(tag_id),
            min,
            max,
        });
        self
    }

    /// Replaces the write rate limit.
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.write.rate_limit = rate_limit;
        self
    }

    /// Limits writes to `burst` requests with a negligible refill.
    pub fn write_burst(self, burst: u32) -> Self {
        self.rate_limit(RateLimitConfig {
            enabled: true,
            requests_per_second: 0.001,
            burst_size: burst,
            ..Default::default()
        })
    }

    /// Sets the retry budget of every policy, with 1ms delays.
    pub fn with_retries(mut self, retries: u32) -> Self {
        let settings = PolicySettings {
            retry: RetryConfig::no_retry()
                .with_max_retries(retries)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
            circuit_breaker: CircuitBreakerConfig::default(),
        };
        let resilience = &mut self.config.resilience;
        resilience.connection = settings.clone();
        resilience.server_communication = settings.clone();
        resilience.generic = settings;
        self
    }

    /// Sets the connection breaker.
    pub fn connection_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.resilience.connection.circuit_breaker = breaker;
        self
    }

    /// Sets buffer capacity and overflow policy.
    pub fn buffer(mut self, capacity: usize, discard_oldest: bool) -> Self {
        self.config.buffer.capacity = capacity;
        self.config.buffer.discard_oldest = discard_oldest;
        self
    }

    /// Sets the drain interval.
    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config.buffer.drain_interval = interval;
        self
    }

    /// Sets the health interval.
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health.interval = interval;
        self
    }

    /// Returns the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl From<ConfigBuilder> for ClientConfig {
    fn from(builder: ConfigBuilder) -> Self {
        builder.build()
    }
}
