// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions.
//!
//! # Schema Structure
//!
//! ```text
//! ClientConfig
//! ├── client: ClientSection
//! ├── servers: Vec<ServerConnectionConfig>
//! ├── tags: Vec<TagDefinition>
//! ├── subscriptions: Vec<SubscriptionConfig>
//! ├── subscription_defaults: SubscriptionDefaults
//! ├── resilience: ResilienceConfig
//! ├── write: WriteConfig
//! ├── buffer: BufferConfig
//! ├── health: HealthConfig
//! ├── shutdown: ShutdownConfig
//! └── logging: LoggingConfig
//! ```
//!
//! [`ClientConfig::validate`] rejects structurally broken files (duplicate
//! ids, dangling references, impossible deadbands). Protocol and endpoint
//! problems are scoped to a single server and reported by
//! [`ClientConfig::server_issues`]; the connection manager marks only that
//! server as failed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use opcc_core::resilience::ResilienceConfig;
use opcc_core::types::{DataType, DeadbandSettings, DeadbandType, EuRange, ProtocolKind, ServerId, TagId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default client id.
pub const DEFAULT_CLIENT_ID: &str = "opc-client-01";

/// Default per-operation timeout.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default subscription publishing interval.
pub const DEFAULT_PUBLISHING_INTERVAL: Duration = Duration::from_secs(1);

/// Default monitored item sampling interval.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(250);

/// Default lifetime count.
pub const DEFAULT_LIFETIME_COUNT: u32 = 60;

/// Default keep-alive count.
pub const DEFAULT_KEEP_ALIVE_COUNT: u32 = 10;

/// Queue size substituted for requested sizes of 0 or 1.
pub const DEFAULT_SERVER_QUEUE_SIZE: u32 = 10;

/// Default buffer capacity in records.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Default drain batch size.
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 500;

/// Default write rate limit.
pub const DEFAULT_WRITE_RPS: f64 = 10.0;

/// Default write burst size.
pub const DEFAULT_WRITE_BURST: u32 = 20;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration of the OPC client core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Client identity.
    #[serde(default)]
    pub client: ClientSection,

    /// Server connections.
    #[serde(default)]
    pub servers: Vec<ServerConnectionConfig>,

    /// Tag definitions.
    #[serde(default)]
    pub tags: Vec<TagDefinition>,

    /// Subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Defaults applied to monitored items.
    #[serde(default)]
    pub subscription_defaults: SubscriptionDefaults,

    /// Retry and circuit breaker profiles.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Write pipeline settings.
    #[serde(default)]
    pub write: WriteConfig,

    /// Outbound buffer settings.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Health monitor settings.
    #[serde(default)]
    pub health: HealthConfig,

    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Validates the configuration.
    ///
    /// Checks ids, duplicates, server and tag references, subscription
    /// parameters, deadbands and the buffer, write and health sections.
    pub fn validate(&self) -> ConfigResult<()> {
        self.client.validate()?;

        let mut server_ids = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if !server_ids.insert(server.id.as_str()) {
                return Err(ConfigError::duplicate_server_id(server.id.as_str()));
            }
            server.validate(&format!("servers[{}]", i))?;
        }

        let mut tags: HashMap<&str, &TagDefinition> = HashMap::new();
        for (i, tag) in self.tags.iter().enumerate() {
            let field = format!("tags[{}]", i);
            if tags.insert(tag.id.as_str(), tag).is_some() {
                return Err(ConfigError::duplicate_tag_id(tag.id.as_str()));
            }
            if !server_ids.contains(tag.server_id.as_str()) {
                return Err(ConfigError::unknown_server(
                    format!("{}.server_id", field),
                    tag.server_id.as_str(),
                ));
            }
            tag.validate(&field)?;
        }

        for (i, sub) in self.subscriptions.iter().enumerate() {
            let field = format!("subscriptions[{}]", i);
            if !server_ids.contains(sub.server_id.as_str()) {
                return Err(ConfigError::unknown_server(
                    format!("{}.server_id", field),
                    sub.server_id.as_str(),
                ));
            }
            sub.validate(&field)?;

            for (j, item) in sub.items.iter().enumerate() {
                let item_field = format!("{}.items[{}]", field, j);
                let tag = tags.get(item.tag_id.as_str()).ok_or_else(|| {
                    ConfigError::unknown_tag(format!("{}.tag_id", item_field), item.tag_id.as_str())
                })?;
                if tag.server_id != sub.server_id {
                    return Err(ConfigError::validation(
                        format!("{}.tag_id", item_field),
                        format!(
                            "tag '{}' belongs to server '{}', not '{}'",
                            tag.id, tag.server_id, sub.server_id
                        ),
                    ));
                }
                item.validate(&item_field, tag)?;
            }
        }

        self.subscription_defaults.validate()?;
        self.write.validate(&tags)?;
        self.buffer.validate()?;
        self.health.validate()?;
        self.logging.validate()?;

        Ok(())
    }

    /// Per-server protocol and endpoint problems.
    ///
    /// These never fail the whole configuration; the affected servers are
    /// marked failed at startup while the others connect.
    pub fn server_issues(&self) -> Vec<(ServerId, ConfigError)> {
        self.servers
            .iter()
            .enumerate()
            .filter_map(|(i, server)| {
                server
                    .resolve_protocol(&format!("servers[{}]", i))
                    .err()
                    .map(|e| (server.id.clone(), e))
            })
            .collect()
    }

    /// Returns the server with `id`.
    pub fn server(&self, id: &ServerId) -> Option<&ServerConnectionConfig> {
        self.servers.iter().find(|s| &s.id == id)
    }

    /// Returns the tag with `id`.
    pub fn tag(&self, id: &TagId) -> Option<&TagDefinition> {
        self.tags.iter().find(|t| &t.id == id)
    }

    /// Enabled servers.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConnectionConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Subscriptions configured for `server_id`.
    pub fn subscriptions_for<'a>(
        &'a self,
        server_id: &'a ServerId,
    ) -> impl Iterator<Item = &'a SubscriptionConfig> + 'a {
        self.subscriptions.iter().filter(move |s| &s.server_id == server_id)
    }
}

// =============================================================================
// Client Section
// =============================================================================

/// Client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Unique client id, stamped on every outbound record.
    #[serde(default = "default_client_id")]
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id: default_client_id(),
            name: None,
        }
    }
}

impl ClientSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::validation("client.id", "must not be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Server Connections
// =============================================================================

/// A configured OPC server connection.
///
/// Immutable once attached to a connection; replacing it goes through the
/// connection manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConnectionConfig {
    /// Unique server id.
    pub id: ServerId,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Protocol variant (`ua`, `hda`, `ac` and aliases).
    pub protocol: String,

    /// Endpoint URL.
    pub endpoint: String,

    /// Message security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Message security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// User identity.
    #[serde(default)]
    pub credentials: Credentials,

    /// Upper bound for each protocol operation.
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Whether the connection is opened at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

fn default_true() -> bool {
    true
}

impl ServerConnectionConfig {
    /// Creates an anonymous, unsecured connection config.
    pub fn new(id: impl Into<ServerId>, protocol: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            protocol: protocol.into(),
            endpoint: endpoint.into(),
            security_policy: SecurityPolicy::None,
            security_mode: SecurityMode::None,
            credentials: Credentials::Anonymous,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            enabled: true,
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Parses the protocol variant and checks the endpoint against it.
    pub fn resolve_protocol(&self, field: &str) -> ConfigResult<ProtocolKind> {
        let kind: ProtocolKind = self.protocol.parse().map_err(|_| {
            ConfigError::validation(
                format!("{}.protocol", field),
                format!("unsupported protocol variant '{}'", self.protocol),
            )
        })?;

        let endpoint = Endpoint::parse(&self.endpoint)
            .map_err(|msg| ConfigError::validation(format!("{}.endpoint", field), msg))?;
        if !kind.endpoint_schemes().contains(&endpoint.scheme.as_str()) {
            return Err(ConfigError::validation(
                format!("{}.endpoint", field),
                format!(
                    "scheme '{}' is not valid for {} (expected one of: {})",
                    endpoint.scheme,
                    kind,
                    kind.endpoint_schemes().join(", ")
                ),
            ));
        }

        if kind == ProtocolKind::Ua
            && (self.security_mode == SecurityMode::None) != (self.security_policy == SecurityPolicy::None)
        {
            return Err(ConfigError::validation(
                format!("{}.security_mode", field),
                "security mode None requires security policy None and vice versa",
            ));
        }

        Ok(kind)
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::validation(format!("{}.id", field), "must not be empty"));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::validation(
                format!("{}.operation_timeout", field),
                "must be greater than zero",
            ));
        }
        self.credentials.validate(&format!("{}.credentials", field))
    }
}

/// A parsed endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Lowercased scheme.
    pub scheme: String,
    /// Host name or address.
    pub host: String,
    /// Port, when given.
    pub port: Option<u16>,
    /// Path after the authority, without the leading slash.
    pub path: String,
}

impl Endpoint {
    /// Parses `scheme://host[:port][/path]`.
    pub fn parse(url: &str) -> Result<Self, String> {
        let (scheme, rest) = url
            .trim()
            .split_once("://")
            .ok_or_else(|| format!("'{}' is missing a scheme", url))?;
        if scheme.is_empty() {
            return Err(format!("'{}' is missing a scheme", url));
        }

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !authority.ends_with(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("'{}' has an invalid port '{}'", url, port))?;
                (host, Some(port))
            }
            _ => (authority, None),
        };
        if host.is_empty() {
            return Err(format!("'{}' is missing a host", url));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

/// Message security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SecurityPolicy {
    /// No security.
    #[default]
    None,
    /// Deprecated RSA-15 policy.
    Basic128Rsa15,
    /// Deprecated SHA-1 policy.
    Basic256,
    /// SHA-256 policy.
    Basic256Sha256,
    /// AES-128 with RSA-OAEP.
    Aes128Sha256RsaOaep,
    /// AES-256 with RSA-PSS.
    Aes256Sha256RsaPss,
}

/// Message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SecurityMode {
    /// Plain messages.
    #[default]
    None,
    /// Signed messages.
    Sign,
    /// Signed and encrypted messages.
    SignAndEncrypt,
}

/// User identity presented when opening a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Anonymous user.
    #[default]
    Anonymous,
    /// Username and password.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: Secret,
    },
    /// X.509 user certificate.
    Certificate {
        /// Certificate file.
        certificate_path: PathBuf,
        /// Private key file.
        private_key_path: PathBuf,
    },
}

impl Credentials {
    fn validate(&self, field: &str) -> ConfigResult<()> {
        match self {
            Credentials::Anonymous => Ok(()),
            Credentials::UserName { username, .. } if username.trim().is_empty() => Err(
                ConfigError::validation(format!("{}.username", field), "must not be empty"),
            ),
            Credentials::UserName { .. } => Ok(()),
            Credentials::Certificate {
                certificate_path,
                private_key_path,
            } => {
                if certificate_path.as_os_str().is_empty() {
                    return Err(ConfigError::missing_field(format!("{}.certificate_path", field)));
                }
                if private_key_path.as_os_str().is_empty() {
                    return Err(ConfigError::missing_field(format!("{}.private_key_path", field)));
                }
                Ok(())
            }
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Anonymous => "anonymous",
            Credentials::UserName { .. } => "user_name",
            Credentials::Certificate { .. } => "certificate",
        }
    }
}

/// A secret string; never printed or serialized in clear.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the clear value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Maps a client-local tag id onto a protocol address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagDefinition {
    /// Client-local tag id.
    pub id: TagId,

    /// Owning server.
    pub server_id: ServerId,

    /// Protocol address (NodeId or ItemId).
    pub address: String,

    /// Expected data type.
    #[serde(default)]
    pub data_type: DataType,

    /// Raw-to-engineering scale factor.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Raw-to-engineering offset.
    #[serde(default)]
    pub offset: f64,

    /// Whether writes are allowed.
    #[serde(default)]
    pub writable: bool,

    /// Forces critical-write handling (pre-fetch and audit).
    #[serde(default)]
    pub critical: bool,

    /// Engineering-unit range.
    #[serde(default)]
    pub eu_range: Option<EuRange>,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

impl TagDefinition {
    /// Creates a read-only float tag without scaling.
    pub fn new(id: impl Into<TagId>, server_id: impl Into<ServerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server_id: server_id.into(),
            address: address.into(),
            data_type: DataType::Float64,
            scale: 1.0,
            offset: 0.0,
            writable: false,
            critical: false,
            eu_range: None,
            description: None,
        }
    }

    /// Returns `true` when scale or offset change the raw value.
    pub fn has_scaling(&self) -> bool {
        self.scale != 1.0 || self.offset != 0.0
    }

    /// `raw * scale + offset`.
    pub fn to_engineering(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }

    /// Inverse of [`to_engineering`](Self::to_engineering).
    pub fn to_raw(&self, engineering: f64) -> f64 {
        (engineering - self.offset) / self.scale
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::validation(format!("{}.id", field), "must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::validation(format!("{}.address", field), "must not be empty"));
        }
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(ConfigError::validation(
                format!("{}.scale", field),
                "must be a finite, non-zero number",
            ));
        }
        if let Some(range) = self.eu_range {
            if range.high <= range.low {
                return Err(ConfigError::validation(
                    format!("{}.eu_range", field),
                    format!("high ({}) must be greater than low ({})", range.high, range.low),
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// A subscription owned by one server connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    /// Owning server.
    pub server_id: ServerId,

    /// Optional name for logs.
    #[serde(default)]
    pub name: Option<String>,

    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime in publishing intervals.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Keep-alive in publishing intervals.
    #[serde(default = "default_keep_alive_count")]
    pub keep_alive_count: u32,

    /// Relative priority.
    #[serde(default)]
    pub priority: u8,

    /// Monitored items.
    #[serde(default)]
    pub items: Vec<MonitoredItemConfig>,
}

fn default_publishing_interval() -> Duration {
    DEFAULT_PUBLISHING_INTERVAL
}

fn default_lifetime_count() -> u32 {
    DEFAULT_LIFETIME_COUNT
}

fn default_keep_alive_count() -> u32 {
    DEFAULT_KEEP_ALIVE_COUNT
}

impl SubscriptionConfig {
    /// Creates a subscription with default timing and no items.
    pub fn new(server_id: impl Into<ServerId>) -> Self {
        Self {
            server_id: server_id.into(),
            name: None,
            publishing_interval: DEFAULT_PUBLISHING_INTERVAL,
            lifetime_count: DEFAULT_LIFETIME_COUNT,
            keep_alive_count: DEFAULT_KEEP_ALIVE_COUNT,
            priority: 0,
            items: Vec::new(),
        }
    }

    /// Adds an item.
    pub fn with_item(mut self, item: MonitoredItemConfig) -> Self {
        self.items.push(item);
        self
    }

    /// Time without any message after which the subscription is dead.
    pub fn lifetime(&self) -> Duration {
        self.publishing_interval.saturating_mul(self.lifetime_count.max(1))
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(ConfigError::validation(
                format!("{}.publishing_interval", field),
                "must be greater than zero",
            ));
        }
        if self.keep_alive_count == 0 {
            return Err(ConfigError::validation(
                format!("{}.keep_alive_count", field),
                "must be at least 1",
            ));
        }
        if self.lifetime_count < self.keep_alive_count.saturating_mul(3) {
            return Err(ConfigError::validation(
                format!("{}.lifetime_count", field),
                format!(
                    "must be at least three times keep_alive_count ({})",
                    self.keep_alive_count
                ),
            ));
        }
        Ok(())
    }
}

/// One monitored item of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoredItemConfig {
    /// Monitored tag.
    pub tag_id: TagId,

    /// Sampling interval.
    #[serde(default = "default_sampling_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Deadband filter kind.
    #[serde(default)]
    pub deadband_type: DeadbandType,

    /// Deadband threshold.
    #[serde(default)]
    pub deadband_value: f64,

    /// Requested queue size; 0 and 1 use the server default.
    #[serde(default)]
    pub queue_size: u32,

    /// Drop the oldest queued notification on overflow.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_sampling_interval() -> Duration {
    DEFAULT_SAMPLING_INTERVAL
}

impl MonitoredItemConfig {
    /// Creates an item without deadband.
    pub fn new(tag_id: impl Into<TagId>) -> Self {
        Self {
            tag_id: tag_id.into(),
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            deadband_type: DeadbandType::None,
            deadband_value: 0.0,
            queue_size: 0,
            discard_oldest: true,
        }
    }

    /// Sets the deadband.
    pub fn with_deadband(mut self, kind: DeadbandType, value: f64) -> Self {
        self.deadband_type = kind;
        self.deadband_value = value;
        self
    }

    /// Sets queue size and discard policy.
    pub fn with_queue(mut self, size: u32, discard_oldest: bool) -> Self {
        self.queue_size = size;
        self.discard_oldest = discard_oldest;
        self
    }

    /// Deadband settings for the protocol request.
    pub fn deadband(&self) -> DeadbandSettings {
        DeadbandSettings {
            kind: self.deadband_type,
            value: self.deadband_value,
        }
    }

    fn validate(&self, field: &str, tag: &TagDefinition) -> ConfigResult<()> {
        if !self.deadband_value.is_finite() || self.deadband_value < 0.0 {
            return Err(ConfigError::validation(
                format!("{}.deadband_value", field),
                "must be a non-negative number",
            ));
        }
        match self.deadband_type {
            DeadbandType::None => {}
            DeadbandType::Absolute | DeadbandType::Percent if !tag.data_type.is_numeric() => {
                return Err(ConfigError::validation(
                    format!("{}.deadband_type", field),
                    format!("deadband requires a numeric tag, '{}' is {}", tag.id, tag.data_type),
                ));
            }
            DeadbandType::Absolute => {}
            DeadbandType::Percent => {
                if tag.eu_range.is_none() {
                    return Err(ConfigError::validation(
                        format!("{}.deadband_type", field),
                        format!("percent deadband requires an eu_range on tag '{}'", tag.id),
                    ));
                }
                if self.deadband_value > 100.0 {
                    return Err(ConfigError::validation(
                        format!("{}.deadband_value", field),
                        "percent deadband must be within 0..=100",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Defaults applied to every monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionDefaults {
    /// Queue size used when an item requests 0 or 1.
    #[serde(default = "default_server_queue_size")]
    pub server_queue_size: u32,
}

fn default_server_queue_size() -> u32 {
    DEFAULT_SERVER_QUEUE_SIZE
}

impl Default for SubscriptionDefaults {
    fn default() -> Self {
        Self {
            server_queue_size: DEFAULT_SERVER_QUEUE_SIZE,
        }
    }
}

impl SubscriptionDefaults {
    fn validate(&self) -> ConfigResult<()> {
        if self.server_queue_size == 0 {
            return Err(ConfigError::validation(
                "subscription_defaults.server_queue_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Write Pipeline
// =============================================================================

/// Write pipeline settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteConfig {
    /// Token bucket rate limit.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-tag value ranges.
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
}

impl WriteConfig {
    fn validate(&self, tags: &HashMap<&str, &TagDefinition>) -> ConfigResult<()> {
        self.rate_limit.validate()?;
        for (i, rule) in self.validation_rules.iter().enumerate() {
            let field = format!("write.validation_rules[{}]", i);
            if !tags.contains_key(rule.tag_id.as_str()) {
                return Err(ConfigError::unknown_tag(format!("{}.tag_id", field), rule.tag_id.as_str()));
            }
            if let (Some(min), Some(max)) = (rule.min, rule.max) {
                if min > max {
                    return Err(ConfigError::validation(
                        field,
                        format!("min ({}) is greater than max ({})", min, max),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Rule for `tag_id`.
    pub fn rule_for(&self, tag_id: &TagId) -> Option<&ValidationRule> {
        self.validation_rules.iter().find(|r| &r.tag_id == tag_id)
    }
}

/// Which identity a write rate limit bucket is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKey {
    /// One bucket per user.
    #[default]
    User,
    /// One bucket per target server.
    Server,
    /// One bucket per user and server pair.
    UserServer,
}

/// Token bucket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether writes are rate limited.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Refill rate.
    #[serde(default = "default_write_rps")]
    pub requests_per_second: f64,

    /// Bucket capacity.
    #[serde(default = "default_write_burst")]
    pub burst_size: u32,

    /// Bucket key.
    #[serde(default)]
    pub key: RateLimitKey,
}

fn default_write_rps() -> f64 {
    DEFAULT_WRITE_RPS
}

fn default_write_burst() -> u32 {
    DEFAULT_WRITE_BURST
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: DEFAULT_WRITE_RPS,
            burst_size: DEFAULT_WRITE_BURST,
            key: RateLimitKey::User,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(ConfigError::validation(
                "write.rate_limit.requests_per_second",
                "must be greater than zero",
            ));
        }
        if self.burst_size == 0 {
            return Err(ConfigError::validation("write.rate_limit.burst_size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Inclusive value range enforced on writes to a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRule {
    /// Target tag.
    pub tag_id: TagId,

    /// Minimum allowed engineering value.
    #[serde(default)]
    pub min: Option<f64>,

    /// Maximum allowed engineering value.
    #[serde(default)]
    pub max: Option<f64>,
}

// =============================================================================
// Buffer, Health, Shutdown
// =============================================================================

/// Outbound buffer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// Maximum buffered records.
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,

    /// Interval between drains.
    #[serde(default = "default_drain_interval", with = "humantime_serde")]
    pub drain_interval: Duration,

    /// Records published per batch.
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    /// How long producers wait for space before discard-newest rejects.
    #[serde(default = "default_producer_wait", with = "humantime_serde")]
    pub producer_wait: Duration,

    /// Overflow policy for records that do not carry their own.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_drain_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_drain_batch_size() -> usize {
    DEFAULT_DRAIN_BATCH_SIZE
}

fn default_producer_wait() -> Duration {
    Duration::from_millis(50)
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            drain_interval: default_drain_interval(),
            drain_batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            producer_wait: default_producer_wait(),
            discard_oldest: true,
        }
    }
}

impl BufferConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::validation("buffer.capacity", "must be at least 1"));
        }
        if self.drain_batch_size == 0 {
            return Err(ConfigError::validation("buffer.drain_batch_size", "must be at least 1"));
        }
        if self.drain_interval.is_zero() {
            return Err(ConfigError::validation("buffer.drain_interval", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Snapshot interval.
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Whether snapshots are published to the buffer.
    #[serde(default = "default_true")]
    pub publish: bool,
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            publish: true,
        }
    }
}

impl HealthConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::validation("health.interval", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Shutdown settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Upper bound for disconnecting all servers.
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Level name as understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Single-line compact text.
    Compact,
}
