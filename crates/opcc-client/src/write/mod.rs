// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Write pipeline.
//!
//! Every write runs through the same fixed stages:
//!
//! ```text
//! WriteRequest
//!     │
//!     ▼
//! ┌──────────────┐  RateLimited
//! │ Rate limiter │──────────────▶ WriteResult (no device access)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐  Validation
//! │  Validator   │──────────────▶ WriteResult (all issues)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │  Pre-fetch   │  critical only, failure is logged
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐  ServerUnavailable / Protocol
//! │Protocol write│──────────────▶ WriteResult
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │    Audit     │  critical only, spawned, never fails the write
//! └──────────────┘
//! ```

mod audit;
mod pipeline;
mod rate_limit;
mod validator;

pub use audit::{AuditorMetrics, CriticalWriteAuditor};
pub use pipeline::WritePipeline;
pub use rate_limit::{RateLimitDecision, WriteRateLimiter};
pub use validator::{IssueKind, ValidatedItem, ValidationIssue, WriteValidator};

use std::fmt;
use std::time::Duration;

use opcc_core::types::{ServerId, TagId, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// WriteContext
// =============================================================================

/// Who requested a write, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteContext {
    /// Requesting user.
    pub user_id: String,
    /// Network address of the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    /// Free-text reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Correlation id of the upstream command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl WriteContext {
    /// Creates a context for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Sets the requester address.
    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    /// Sets the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

// =============================================================================
// WriteRequest
// =============================================================================

/// Values to write to one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Request id, echoed in the result and the audit record.
    pub request_id: Uuid,
    /// Target server.
    pub server_id: ServerId,
    /// Tags and engineering values, in write order.
    pub items: Vec<(TagId, Value)>,
    /// Requester.
    pub context: WriteContext,
    /// Forces auditing even if no tag is marked critical.
    #[serde(default)]
    pub is_critical: bool,
}

impl WriteRequest {
    /// Creates an empty request.
    pub fn new(server_id: impl Into<ServerId>, context: WriteContext) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            server_id: server_id.into(),
            items: Vec::new(),
            context,
            is_critical: false,
        }
    }

    /// Adds a value.
    pub fn with_item(mut self, tag_id: impl Into<TagId>, value: Value) -> Self {
        self.items.push((tag_id.into(), value));
        self
    }

    /// Marks the request critical.
    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }
}

// =============================================================================
// WriteResult
// =============================================================================

/// Outcome of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// The tag.
    pub tag_id: TagId,
    /// Requested engineering value.
    pub value: Value,
    /// Whether the device accepted the value.
    pub success: bool,
    /// Device error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Value read before the write (critical writes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

/// Why a request failed as a whole.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteFailure {
    /// The bucket for this key is empty.
    #[error("Write rate limit exceeded for '{key}', retry after {retry_after:?}")]
    RateLimited {
        /// Bucket key.
        key: String,
        /// Time until a token is available.
        retry_after: Duration,
    },

    /// One or more items failed validation.
    #[error("Write validation failed: {}", summarize(.issues))]
    Validation {
        /// Every issue found.
        issues: Vec<ValidationIssue>,
    },

    /// The target server has no active session.
    #[error("Server '{server_id}' unavailable: {reason}")]
    ServerUnavailable {
        /// Target server.
        server_id: ServerId,
        /// Why.
        reason: String,
    },

    /// The protocol write call failed.
    #[error("Write failed: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// The request was cancelled.
    #[error("Write cancelled")]
    Cancelled,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl WriteFailure {
    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Validation { .. } => "validation",
            Self::ServerUnavailable { .. } => "server_unavailable",
            Self::Protocol { .. } => "protocol",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of a [`WriteRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Request id.
    pub request_id: Uuid,
    /// Target server.
    pub server_id: ServerId,
    /// Per-item outcomes; empty when the request failed before the device.
    pub items: Vec<ItemOutcome>,
    /// Request-level failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<WriteFailure>,
    /// Whether the write was critical.
    pub critical: bool,
    /// Whether an audit record was submitted.
    pub audited: bool,
}

impl WriteResult {
    fn rejected(request: &WriteRequest, failure: WriteFailure) -> Self {
        Self {
            request_id: request.request_id,
            server_id: request.server_id.clone(),
            items: Vec::new(),
            failure: Some(failure),
            critical: request.is_critical,
            audited: false,
        }
    }

    /// Returns `true` if the request and every item succeeded.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.items.iter().all(|i| i.success)
    }

    /// Items the device rejected.
    pub fn failed_items(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| !i.success)
    }
}

impl fmt::Display for WriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Some(failure) => write!(f, "write {} failed: {}", self.request_id, failure),
            None => {
                let ok = self.items.iter().filter(|i| i.success).count();
                write!(f, "write {}: {}/{} items succeeded", self.request_id, ok, self.items.len())
            }
        }
    }
}
