// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Data-change and event subscriptions.
//!
//! ```text
//!   ClientEvent ──▶ SubscriptionRegistry ──▶ deadband ──▶ scaling ──▶ ItemQueue ──▶ DataBuffer
//!                        │
//!                        └── Alarm ──────────────────────────────────────────────▶ DataBuffer
//! ```
//!
//! The [`SubscriptionManager`] registers subscriptions with the protocol
//! clients, restores them after reconnects and reports their status. The
//! [`SubscriptionRegistry`] holds per-item filter and queue state and turns
//! incoming notifications into outbound records.

mod deadband;
mod manager;
mod queue;
mod registry;

pub use deadband::DeadbandFilter;
pub use manager::SubscriptionManager;
pub use queue::ItemQueue;
pub use registry::{EventOutcome, SubscriptionRegistry};

use opcc_core::error::ClientError;
use opcc_core::types::{ServerId, SubscriptionId, TagId};
use thiserror::Error;

/// Subscription management errors.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// No subscription with this id.
    #[error("Subscription not found: {id}")]
    NotFound {
        /// Requested id.
        id: SubscriptionId,
    },

    /// The server is not registered.
    #[error("Unknown server: {server_id}")]
    UnknownServer {
        /// Requested server.
        server_id: ServerId,
    },

    /// The configuration names a different server than the request.
    #[error("Subscription for server '{configured}' requested on '{requested}'")]
    ServerMismatch {
        /// Server of the request.
        requested: ServerId,
        /// Server of the configuration.
        configured: ServerId,
    },

    /// A monitored item references an unknown tag.
    #[error("Unknown tag: {tag_id}")]
    UnknownTag {
        /// The tag.
        tag_id: TagId,
    },

    /// A monitored item references another server's tag.
    #[error("Tag '{tag_id}' belongs to server '{server_id}'")]
    TagServerMismatch {
        /// The tag.
        tag_id: TagId,
        /// Server the tag belongs to.
        server_id: ServerId,
    },

    /// Invalid item settings, such as a percent deadband without EU range.
    #[error("Invalid subscription configuration: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// The server's protocol has no subscriptions.
    #[error("Server '{server_id}' does not support subscriptions")]
    Unsupported {
        /// The server.
        server_id: ServerId,
    },

    /// The operation was cancelled.
    #[error("Subscription operation cancelled")]
    Cancelled,

    /// Protocol client failure.
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SubscriptionError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Client(e) => e.is_transient() || matches!(e, ClientError::NotConnected),
            _ => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::UnknownServer { .. } => "unknown_server",
            Self::ServerMismatch { .. } => "server_mismatch",
            Self::UnknownTag { .. } => "unknown_tag",
            Self::TagServerMismatch { .. } => "tag_server_mismatch",
            Self::Configuration { .. } => "configuration",
            Self::Unsupported { .. } => "unsupported",
            Self::Cancelled => "cancelled",
            Self::Client(e) => e.error_type(),
        }
    }
}
