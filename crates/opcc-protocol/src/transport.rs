// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session transport abstraction.
//!
//! A [`SessionTransport`] exposes the session and service primitives a vendor
//! OPC SDK provides. The protocol adapters are written against this trait
//! only, which keeps them testable against the in-memory
//! [`SimulatedServer`](crate::simulated::SimulatedServer).

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opcc_config::ServerConnectionConfig;
use opcc_core::client::{BrowseEntry, HistoryQuery, MonitoredItemRequest, SubscriptionParams};
use opcc_core::types::{AckState, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::conversion::StatusCode;

// =============================================================================
// TransportError
// =============================================================================

/// A failed service call, expressed as an OPC status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}{}", message_suffix(.message))]
pub struct TransportError {
    /// Status code returned by the service.
    pub code: StatusCode,
    /// Additional diagnostic text.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<StatusCode> for TransportError {
    fn from(code: StatusCode) -> Self {
        Self::new(code, "")
    }
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

/// Result alias for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Service payloads
// =============================================================================

/// A value with its status and source timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    /// Value; `Null` when the status is bad.
    pub value: Value,
    /// Status of the value.
    pub status: StatusCode,
    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// A good value stamped now.
    pub fn good(value: Value) -> Self {
        Self {
            value,
            status: StatusCode::GOOD,
            source_timestamp: Some(Utc::now()),
        }
    }

    /// A bad status without a value.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: Value::Null,
            status,
            source_timestamp: None,
        }
    }
}

/// Server response for one monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredItemCreateResult {
    /// Item status.
    pub status: StatusCode,
    /// Server-assigned item id; meaningful only when `status` is good.
    pub monitored_item_id: u32,
}

/// One historical sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    /// Address the sample belongs to.
    pub address: String,
    /// Value and status.
    pub data: DataValue,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
}

/// An event notification as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNotification {
    /// Server event id.
    pub event_id: String,
    /// Source (area or equipment).
    pub source: String,
    /// Message text.
    pub message: String,
    /// Raw severity; may fall outside 1..=1000.
    pub severity: u16,
    /// Acknowledgement state.
    pub ack_state: AckState,
    /// Event time.
    pub time: DateTime<Utc>,
}

/// Asynchronous messages from an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A monitored item changed.
    DataChange {
        /// Protocol subscription id.
        subscription: u32,
        /// Client handle of the item.
        client_handle: u32,
        /// New value.
        data: DataValue,
    },
    /// Subscription keep-alive.
    KeepAlive {
        /// Protocol subscription id.
        subscription: u32,
    },
    /// Alarm or condition event.
    Event(EventNotification),
    /// The session status changed; bad codes mean the session is gone.
    Status(StatusCode),
}

// =============================================================================
// SessionTransport
// =============================================================================

/// Session and service primitives of a vendor OPC stack.
///
/// Methods take `&self`; implementations use interior mutability.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Endpoint this transport talks to.
    fn endpoint(&self) -> &str;

    /// Opens a session with the security settings of `config`.
    async fn open_session(&self, config: &ServerConnectionConfig) -> TransportResult<()>;

    /// Closes the session.
    async fn close_session(&self) -> TransportResult<()>;

    /// Returns `true` while the session is open.
    fn is_open(&self) -> bool;

    /// Takes the notification stream of the current session.
    fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>>;

    /// Reads current values, one result per address.
    async fn read(&self, addresses: &[String]) -> TransportResult<Vec<DataValue>>;

    /// Writes values, one status per item.
    async fn write(&self, items: &[(String, Value)]) -> TransportResult<Vec<StatusCode>>;

    /// Creates a data or event subscription.
    async fn create_subscription(&self, params: &SubscriptionParams) -> TransportResult<u32>;

    /// Registers monitored items.
    async fn create_monitored_items(
        &self,
        subscription: u32,
        items: &[MonitoredItemRequest],
    ) -> TransportResult<Vec<MonitoredItemCreateResult>>;

    /// Deletes a subscription.
    async fn delete_subscription(&self, subscription: u32) -> TransportResult<()>;

    /// Lists children of `parent`, or of the root.
    async fn browse(&self, parent: Option<&str>) -> TransportResult<Vec<BrowseEntry>>;

    /// Reads raw history.
    async fn read_history(&self, query: &HistoryQuery) -> TransportResult<Vec<HistorySample>>;

    /// Acknowledges an event.
    async fn acknowledge(&self, event_id: &str, comment: &str) -> TransportResult<()>;
}

impl fmt::Debug for dyn SessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTransport")
            .field("endpoint", &self.endpoint())
            .field("open", &self.is_open())
            .finish()
    }
}
