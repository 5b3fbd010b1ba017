// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The protocol client abstraction.
//!
//! Every OPC variant (UA, HDA, AC) is an independent adapter implementing
//! [`ProtocolClient`]. Operations a variant cannot perform keep the default
//! implementation, which returns [`ClientError::Unsupported`].
//!
//! # Event stream
//!
//! Subscription notifications, keep-alives, alarm events and session loss
//! are delivered on a single ordered channel per client. The channel is taken
//! once via [`ProtocolClient::take_events`] by whoever owns the connection.
//!
//! ```text
//!   SessionTransport ──▶ adapter ──▶ mpsc<ClientEvent> ──▶ connection event pump
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};
use crate::types::{AlarmEvent, DataType, DeadbandSettings, EuRange, ProtocolKind, Quality, ServerId, Value};

// =============================================================================
// Capabilities
// =============================================================================

/// Operations a protocol adapter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Current-value reads.
    pub read: bool,
    /// Value writes.
    pub write: bool,
    /// Data-change subscriptions.
    pub subscriptions: bool,
    /// Historical reads.
    pub history: bool,
    /// Alarm events and acknowledgement.
    pub alarms: bool,
    /// Address-space browsing.
    pub browse: bool,
}

impl Capabilities {
    /// Full UA capability set.
    pub const UA: Self = Self {
        read: true,
        write: true,
        subscriptions: true,
        history: true,
        alarms: true,
        browse: true,
    };

    /// HDA: history, latest-value reads and browsing.
    pub const HDA: Self = Self {
        read: true,
        write: false,
        subscriptions: false,
        history: true,
        alarms: false,
        browse: true,
    };

    /// AC: event subscriptions, acknowledgement and browsing.
    pub const AC: Self = Self {
        read: false,
        write: false,
        subscriptions: true,
        history: false,
        alarms: true,
        browse: true,
    };
}

// =============================================================================
// Request / response types
// =============================================================================

/// A value read from a protocol address.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadValue {
    /// Protocol address.
    pub address: String,
    /// Raw value.
    pub value: Value,
    /// Quality derived from the status code.
    pub quality: Quality,
    /// Source timestamp, when reported.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// A raw value to write to a protocol address.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteItem {
    /// Protocol address.
    pub address: String,
    /// Raw value.
    pub value: Value,
}

/// Protocol-level subscription parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionParams {
    /// Requested publishing interval.
    pub publishing_interval: Duration,
    /// Lifetime in publishing intervals.
    pub lifetime_count: u32,
    /// Keep-alive in publishing intervals.
    pub keep_alive_count: u32,
    /// Relative priority.
    pub priority: u8,
}

impl SubscriptionParams {
    /// Time without any message after which the subscription is considered dead.
    pub fn lifetime(&self) -> Duration {
        self.publishing_interval
            .saturating_mul(self.lifetime_count.max(1))
    }
}

/// A monitored item to register on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRequest {
    /// Handle echoed in every notification for this item.
    pub client_handle: u32,
    /// Protocol address.
    pub address: String,
    /// Requested sampling interval.
    pub sampling_interval: Duration,
    /// Server-side queue size (already normalized).
    pub queue_size: u32,
    /// Server-side discard policy.
    pub discard_oldest: bool,
    /// Deadband filter sent to the server.
    pub deadband: DeadbandSettings,
    /// EU range, required by percent deadbands.
    pub eu_range: Option<EuRange>,
}

/// Outcome of registering one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemResult {
    /// Handle from the request.
    pub client_handle: u32,
    /// Server-assigned id, or the rejection reason.
    pub result: Result<u32, String>,
}

/// An entry in the server address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseEntry {
    /// Protocol address.
    pub address: String,
    /// Display name.
    pub display_name: String,
    /// Whether the entry has children.
    pub is_folder: bool,
    /// Value type for variables.
    pub data_type: Option<DataType>,
}

/// A historical read request against protocol addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    /// Addresses to read.
    pub addresses: Vec<String>,
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
    /// Maximum values per address; 0 means no limit.
    pub max_values: u32,
}

/// One historical sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryValue {
    /// Protocol address.
    pub address: String,
    /// Raw value.
    pub value: Value,
    /// Quality.
    pub quality: Quality,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Events
// =============================================================================

/// Asynchronous notifications from a protocol client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A monitored item changed.
    DataChange {
        /// Protocol subscription id.
        subscription: u32,
        /// Monitored item client handle.
        client_handle: u32,
        /// Raw value.
        value: Value,
        /// Quality.
        quality: Quality,
        /// Source timestamp.
        source_timestamp: Option<DateTime<Utc>>,
    },
    /// The server confirmed the subscription is alive.
    KeepAlive {
        /// Protocol subscription id.
        subscription: u32,
    },
    /// An alarm or condition event.
    Alarm(AlarmEvent),
    /// The session was lost.
    ConnectionLost {
        /// Reason reported by the transport.
        reason: String,
    },
}

/// Capacity of the per-client event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Creates the event channel adapters hand out through `take_events`.
pub fn event_channel() -> (mpsc::Sender<ClientEvent>, mpsc::Receiver<ClientEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

// =============================================================================
// ProtocolClient
// =============================================================================

/// Capability set shared by all OPC protocol adapters.
///
/// Methods take `&self`; adapters use interior mutability so a client can be
/// shared between the connection, the subscription manager and the write
/// pipeline.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Protocol variant.
    fn protocol(&self) -> ProtocolKind;

    /// Server this client talks to.
    fn server_id(&self) -> &ServerId;

    /// Supported operations.
    fn capabilities(&self) -> Capabilities;

    /// Opens the session.
    async fn connect(&self) -> ClientResult<()>;

    /// Closes the session.
    async fn disconnect(&self) -> ClientResult<()>;

    /// Returns `true` while the session is open.
    fn is_connected(&self) -> bool;

    /// Takes the event receiver; returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>>;

    /// Reads current values.
    async fn read(&self, _addresses: &[String]) -> ClientResult<Vec<ReadValue>> {
        Err(ClientError::unsupported("read", self.protocol().as_str()))
    }

    /// Writes values; one result per item in request order.
    async fn write(&self, _items: &[WriteItem]) -> ClientResult<Vec<ClientResult<()>>> {
        Err(ClientError::unsupported("write", self.protocol().as_str()))
    }

    /// Creates a protocol subscription and returns its id.
    async fn create_subscription(&self, _params: &SubscriptionParams) -> ClientResult<u32> {
        Err(ClientError::unsupported(
            "create_subscription",
            self.protocol().as_str(),
        ))
    }

    /// Registers monitored items on a subscription.
    async fn add_monitored_items(
        &self,
        _subscription: u32,
        _items: &[MonitoredItemRequest],
    ) -> ClientResult<Vec<MonitoredItemResult>> {
        Err(ClientError::unsupported(
            "add_monitored_items",
            self.protocol().as_str(),
        ))
    }

    /// Deletes a protocol subscription.
    async fn delete_subscription(&self, _subscription: u32) -> ClientResult<()> {
        Err(ClientError::unsupported(
            "delete_subscription",
            self.protocol().as_str(),
        ))
    }

    /// Browses children of `parent`, or the root when `None`.
    async fn browse(&self, _parent: Option<&str>) -> ClientResult<Vec<BrowseEntry>> {
        Err(ClientError::unsupported("browse", self.protocol().as_str()))
    }

    /// Reads raw history.
    async fn read_history(&self, _query: &HistoryQuery) -> ClientResult<Vec<HistoryValue>> {
        Err(ClientError::unsupported("read_history", self.protocol().as_str()))
    }

    /// Acknowledges an alarm event.
    async fn acknowledge(&self, _event_id: &str, _comment: &str) -> ClientResult<()> {
        Err(ClientError::unsupported("acknowledge", self.protocol().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ReadOnlyClient {
        server_id: ServerId,
        connected: AtomicBool,
    }

    #[async_trait]
    impl ProtocolClient for ReadOnlyClient {
        fn protocol(&self) -> ProtocolKind {
            ProtocolKind::Hda
        }

        fn server_id(&self) -> &ServerId {
            &self.server_id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::HDA
        }

        async fn connect(&self) -> ClientResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> ClientResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
            None
        }
    }

    #[tokio::test]
    async fn test_defaults_are_unsupported() {
        let client = ReadOnlyClient {
            server_id: ServerId::new("hda"),
            connected: AtomicBool::new(false),
        };
        client.connect().await.unwrap();
        assert!(client.is_connected());

        let err = client
            .write(&[WriteItem {
                address: "x".into(),
                value: Value::Int32(1),
            }])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Unsupported {
                operation: "write",
                protocol: "hda"
            }
        ));
    }

    #[test]
    fn test_subscription_lifetime() {
        let params = SubscriptionParams {
            publishing_interval: Duration::from_millis(500),
            lifetime_count: 60,
            keep_alive_count: 10,
            priority: 0,
        };
        assert_eq!(params.lifetime(), Duration::from_secs(30));
    }
}
