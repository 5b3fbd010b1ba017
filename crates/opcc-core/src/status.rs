// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection, subscription and health status types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitState;
use crate::types::{ProtocolKind, ServerId, SubscriptionId};

// =============================================================================
// ConnectionStatus
// =============================================================================

/// Lifecycle state of a server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session.
    #[default]
    Disconnected,
    /// First connect in progress.
    Connecting,
    /// Session open.
    Connected,
    /// Disconnect in progress.
    Disconnecting,
    /// Connect in progress after an error.
    Reconnecting,
    /// Last connect attempt or the session failed.
    Error,
}

impl ConnectionStatus {
    /// Returns `true` while connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a connect or disconnect is running.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// =============================================================================
// SubscriptionStatus
// =============================================================================

/// Health of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Receiving notifications or keep-alives.
    Active,
    /// Waiting for the server connection.
    Connecting,
    /// Server connection is down.
    Disconnected,
    /// Registration failed or the subscription went silent.
    Error,
    /// No subscriptions are configured for the server.
    NoConfig,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::NoConfig => "no_config",
        };
        f.write_str(s)
    }
}

/// Status report of one subscription, or of a server without subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatusReport {
    /// Owning server.
    pub server_id: ServerId,
    /// Subscription handle; `None` for `NoConfig` reports.
    pub subscription_id: Option<SubscriptionId>,
    /// Current status.
    pub status: SubscriptionStatus,
    /// Registered monitored items.
    pub monitored_items: usize,
    /// Last notification or keep-alive.
    pub last_activity: Option<DateTime<Utc>>,
    /// Last error, if any.
    pub error: Option<String>,
}

// =============================================================================
// Health
// =============================================================================

/// Aggregate client health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every enabled server is connected and subscriptions are active.
    Healthy,
    /// Some servers or subscriptions are impaired.
    Degraded,
    /// No server is connected.
    Unhealthy,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health of one server connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHealth {
    /// Server id.
    pub server_id: ServerId,
    /// Protocol, when the configuration was valid.
    pub protocol: Option<ProtocolKind>,
    /// Connection state.
    pub status: ConnectionStatus,
    /// Time of the last state change.
    pub last_change: DateTime<Utc>,
    /// Last recorded error.
    pub last_error: Option<String>,
    /// Server-communication breaker state.
    pub breaker_state: CircuitState,
}

/// Process resource metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// Seconds since the client core started.
    pub uptime_secs: u64,
    /// Resident set size, when the platform reports it.
    pub resident_memory_bytes: Option<u64>,
    /// Records dropped by the outbound buffer.
    pub buffer_dropped: u64,
    /// Records delivered to the sink.
    pub records_published: u64,
    /// Critical-write audits that failed.
    pub audit_failures: u64,
}

/// Periodic health snapshot of the whole client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHealthStatus {
    /// Client identity.
    pub client_id: String,
    /// Aggregate status.
    pub overall: OverallStatus,
    /// Per-server health.
    pub servers: Vec<ServerHealth>,
    /// Per-subscription status.
    pub subscriptions: Vec<SubscriptionStatusReport>,
    /// Records waiting in the outbound buffer.
    pub buffered_items: usize,
    /// Resource metrics.
    pub resources: ResourceMetrics,
    /// Snapshot time.
    pub timestamp: DateTime<Utc>,
}
