// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Inbound command surface.
//!
//! [`CommandService`] is the single entry point for commands coming from
//! outside the client core:
//!
//! | Command                 | Resilience                       |
//! |-------------------------|----------------------------------|
//! | `read_tags`             | server-communication, retried    |
//! | `query_historical_data` | server-communication, retried    |
//! | `browse`                | server-communication, retried    |
//! | `write_tags`            | write pipeline, never retried    |
//! | `acknowledge_alarm`     | server-communication, no retry   |
//! | `create_subscription`   | subscription manager             |
//! | `remove_subscription`   | subscription manager             |
//!
//! Every command takes a [`CancellationToken`]; cancellation yields
//! [`CommandError::Cancelled`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opcc_config::{SubscriptionConfig, TagDefinition};
use opcc_core::client::{BrowseEntry, Capabilities, HistoryQuery, ProtocolClient};
use opcc_core::error::ClientError;
use opcc_core::types::{DataPoint, ServerId, SubscriptionId, TagId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::manager::ConnectionManager;
use crate::subscription::{SubscriptionError, SubscriptionManager};
use crate::tags::{to_engineering, TagRegistry};
use crate::write::{WriteFailure, WritePipeline, WriteRequest, WriteResult};

// =============================================================================
// CommandError
// =============================================================================

/// Command failures.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The command was cancelled.
    #[error("Command cancelled")]
    Cancelled,

    /// The server is not registered.
    #[error("Unknown server: {server_id}")]
    UnknownServer {
        /// Requested server.
        server_id: ServerId,
    },

    /// The tag is not configured.
    #[error("Unknown tag: {tag_id}")]
    UnknownTag {
        /// Requested tag.
        tag_id: TagId,
    },

    /// The tag belongs to another server.
    #[error("Tag '{tag_id}' belongs to server '{server_id}'")]
    TagServerMismatch {
        /// Requested tag.
        tag_id: TagId,
        /// Server the tag belongs to.
        server_id: ServerId,
    },

    /// The server has no active session.
    #[error("Server not connected: {server_id}")]
    NotConnected {
        /// Target server.
        server_id: ServerId,
    },

    /// The server's protocol lacks the capability.
    #[error("Server '{server_id}' does not support {operation}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Target server.
        server_id: ServerId,
    },

    /// The request is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message.
        message: String,
    },

    /// Protocol client failure.
    #[error(transparent)]
    Client(ClientError),

    /// Subscription failure.
    #[error(transparent)]
    Subscription(SubscriptionError),
}

impl CommandError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the command may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected { .. } => true,
            Self::Client(e) => e.is_transient(),
            Self::Subscription(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::UnknownServer { .. } => "unknown_server",
            Self::UnknownTag { .. } => "unknown_tag",
            Self::TagServerMismatch { .. } => "tag_server_mismatch",
            Self::NotConnected { .. } => "not_connected",
            Self::Unsupported { .. } => "unsupported",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Client(e) => e.error_type(),
            Self::Subscription(e) => e.error_type(),
        }
    }
}

impl From<ClientError> for CommandError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Cancelled => Self::Cancelled,
            err => Self::Client(err),
        }
    }
}

impl From<SubscriptionError> for CommandError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Cancelled | SubscriptionError::Client(ClientError::Cancelled) => Self::Cancelled,
            SubscriptionError::UnknownServer { server_id } => Self::UnknownServer { server_id },
            err => Self::Subscription(err),
        }
    }
}

/// Result type for commands.
pub type CommandResult<T> = Result<T, CommandError>;

// =============================================================================
// Requests
// =============================================================================

/// Historical data request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalQuery {
    /// Tags to read.
    pub tag_ids: Vec<TagId>,
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
    /// Maximum values per tag; 0 means no limit.
    #[serde(default)]
    pub max_values: u32,
}

/// Who acknowledges an alarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckContext {
    /// Acknowledging user.
    pub user_id: String,
    /// Operator comment.
    #[serde(default)]
    pub comment: String,
}

// =============================================================================
// CommandService
// =============================================================================

/// Dispatches inbound commands to the connection, subscription and write
/// components.
pub struct CommandService {
    connections: Arc<ConnectionManager>,
    tags: Arc<TagRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    writes: Arc<WritePipeline>,
}

impl CommandService {
    /// Creates a service.
    pub fn new(
        connections: Arc<ConnectionManager>,
        tags: Arc<TagRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        writes: Arc<WritePipeline>,
    ) -> Self {
        Self {
            connections,
            tags,
            subscriptions,
            writes,
        }
    }

    /// Reads the current values of `tag_ids` in engineering units.
    #[instrument(skip(self, tag_ids, cancel), fields(server_id = %server_id, tags = tag_ids.len()))]
    pub async fn read_tags(
        &self,
        server_id: &ServerId,
        tag_ids: &[TagId],
        cancel: &CancellationToken,
    ) -> CommandResult<Vec<DataPoint>> {
        ensure_live(cancel)?;
        let tags = self.resolve_tags(server_id, tag_ids)?;
        let client = self.client_for(server_id, "read", |c| c.read)?;
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let addresses: Vec<String> = tags.iter().map(|t| t.address.clone()).collect();
        let values = self
            .connections
            .policies()
            .server_communication
            .execute(server_id.as_str(), cancel, || {
                let client = client.clone();
                let addresses = addresses.clone();
                async move { client.read(&addresses).await }
            })
            .await?;

        if values.len() != tags.len() {
            return Err(CommandError::Client(ClientError::protocol(format!(
                "read returned {} values for {} tags",
                values.len(),
                tags.len()
            ))));
        }

        let points = tags
            .into_iter()
            .zip(values)
            .map(|(tag, read)| {
                DataPoint::new(
                    server_id.clone(),
                    tag.id.clone(),
                    to_engineering(&tag, read.value),
                    read.quality,
                )
                .with_source_timestamp(read.source_timestamp)
            })
            .collect();
        Ok(points)
    }

    /// Writes through the write pipeline.
    ///
    /// Rate limiting, validation and device failures are reported inside
    /// the [`WriteResult`].
    #[instrument(skip(self, request, cancel), fields(server_id = %server_id, request_id = %request.request_id))]
    pub async fn write_tags(
        &self,
        server_id: &ServerId,
        request: WriteRequest,
        cancel: &CancellationToken,
    ) -> CommandResult<WriteResult> {
        ensure_live(cancel)?;
        if &request.server_id != server_id {
            return Err(CommandError::invalid_request(format!(
                "write request targets '{}' but was sent to '{}'",
                request.server_id, server_id
            )));
        }
        if !self.connections.has_server(server_id) {
            return Err(CommandError::UnknownServer {
                server_id: server_id.clone(),
            });
        }

        let result = self.writes.handle(request, cancel).await;
        match result.failure {
            Some(WriteFailure::Cancelled) => Err(CommandError::Cancelled),
            _ => Ok(result),
        }
    }

    /// Creates a subscription.
    pub async fn create_subscription(
        &self,
        server_id: &ServerId,
        config: SubscriptionConfig,
        cancel: &CancellationToken,
    ) -> CommandResult<SubscriptionId> {
        ensure_live(cancel)?;
        Ok(self
            .subscriptions
            .create_subscription(server_id, config, cancel)
            .await?)
    }

    /// Removes a subscription.
    pub async fn remove_subscription(&self, id: SubscriptionId, cancel: &CancellationToken) -> CommandResult<()> {
        ensure_live(cancel)?;
        Ok(self.subscriptions.remove_subscription(id, cancel).await?)
    }

    /// Reads historical samples of `query.tag_ids`, in engineering units.
    ///
    /// Each returned point carries the sample time as its source timestamp.
    #[instrument(skip(self, query, cancel), fields(server_id = %server_id, tags = query.tag_ids.len()))]
    pub async fn query_historical_data(
        &self,
        server_id: &ServerId,
        query: &HistoricalQuery,
        cancel: &CancellationToken,
    ) -> CommandResult<Vec<DataPoint>> {
        ensure_live(cancel)?;
        if query.start >= query.end {
            return Err(CommandError::invalid_request("history start must be before end"));
        }
        let tags = self.resolve_tags(server_id, &query.tag_ids)?;
        let client = self.client_for(server_id, "history", |c| c.history)?;

        let protocol_query = HistoryQuery {
            addresses: tags.iter().map(|t| t.address.clone()).collect(),
            start: query.start,
            end: query.end,
            max_values: query.max_values,
        };
        let samples = self
            .connections
            .policies()
            .server_communication
            .execute(server_id.as_str(), cancel, || {
                let client = client.clone();
                let query = protocol_query.clone();
                async move { client.read_history(&query).await }
            })
            .await?;

        let points: Vec<DataPoint> = samples
            .into_iter()
            .filter_map(|sample| {
                let tag = tags.iter().find(|t| t.address == sample.address)?;
                Some(
                    DataPoint::new(
                        server_id.clone(),
                        tag.id.clone(),
                        to_engineering(tag, sample.value),
                        sample.quality,
                    )
                    .with_source_timestamp(Some(sample.timestamp)),
                )
            })
            .collect();
        debug!(samples = points.len(), "History query completed");
        Ok(points)
    }

    /// Acknowledges an alarm. Not retried.
    #[instrument(skip(self, context, cancel), fields(server_id = %server_id, user_id = %context.user_id))]
    pub async fn acknowledge_alarm(
        &self,
        server_id: &ServerId,
        event_id: &str,
        context: &AckContext,
        cancel: &CancellationToken,
    ) -> CommandResult<()> {
        ensure_live(cancel)?;
        if event_id.is_empty() {
            return Err(CommandError::invalid_request("event id is empty"));
        }
        let client = self.client_for(server_id, "alarm acknowledgement", |c| c.alarms)?;

        self.connections
            .policies()
            .server_communication
            .execute_once(server_id.as_str(), cancel, client.acknowledge(event_id, &context.comment))
            .await?;
        info!(event_id, "Alarm acknowledged");
        Ok(())
    }

    /// Lists the children of `parent`, or the root nodes.
    pub async fn browse(
        &self,
        server_id: &ServerId,
        parent: Option<&str>,
        cancel: &CancellationToken,
    ) -> CommandResult<Vec<BrowseEntry>> {
        ensure_live(cancel)?;
        let client = self.client_for(server_id, "browse", |c| c.browse)?;
        let parent = parent.map(str::to_string);
        Ok(self
            .connections
            .policies()
            .server_communication
            .execute(server_id.as_str(), cancel, || {
                let client = client.clone();
                let parent = parent.clone();
                async move { client.browse(parent.as_deref()).await }
            })
            .await?)
    }

    fn resolve_tags(&self, server_id: &ServerId, tag_ids: &[TagId]) -> CommandResult<Vec<TagDefinition>> {
        if !self.connections.has_server(server_id) {
            return Err(CommandError::UnknownServer {
                server_id: server_id.clone(),
            });
        }
        tag_ids
            .iter()
            .map(|id| {
                let tag = self
                    .tags
                    .get(id)
                    .ok_or_else(|| CommandError::UnknownTag { tag_id: id.clone() })?;
                if &tag.server_id != server_id {
                    return Err(CommandError::TagServerMismatch {
                        tag_id: id.clone(),
                        server_id: tag.server_id.clone(),
                    });
                }
                Ok(tag.clone())
            })
            .collect()
    }

    fn client_for(
        &self,
        server_id: &ServerId,
        operation: &'static str,
        capability: impl Fn(&Capabilities) -> bool,
    ) -> CommandResult<Arc<dyn ProtocolClient>> {
        let client = self.connections.active_client(server_id).map_err(|e| match e {
            ClientError::NotConnected => CommandError::NotConnected {
                server_id: server_id.clone(),
            },
            _ => CommandError::UnknownServer {
                server_id: server_id.clone(),
            },
        })?;
        if !capability(&client.capabilities()) {
            return Err(CommandError::Unsupported {
                operation,
                server_id: server_id.clone(),
            });
        }
        Ok(client)
    }
}

fn ensure_live(cancel: &CancellationToken) -> CommandResult<()> {
    if cancel.is_cancelled() {
        Err(CommandError::Cancelled)
    } else {
        Ok(())
    }
}

impl fmt::Debug for CommandService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandService")
            .field("servers", &self.connections.count())
            .field("tags", &self.tags.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use opcc_config::{BufferConfig, ServerConnectionConfig, SubscriptionDefaults, WriteConfig};
    use opcc_core::audit::InMemoryAuditLogger;
    use opcc_core::types::{AckState, DataType, Quality, Value};
    use opcc_buffer::DataBuffer;
    use opcc_protocol::{ClientFactory, SimulatedServer, SimulatedTransportProvider};

    use crate::connection::TracingStatusSink;
    use crate::testing::fast_policies;
    use crate::write::{CriticalWriteAuditor, WriteContext};

    const FLOW: &str = "ns=2;s=Line1.Flow";

    struct Fixture {
        plc: Arc<SimulatedServer>,
        hist: Arc<SimulatedServer>,
        service: CommandService,
        cancel: CancellationToken,
    }

    async fn fixture() -> Fixture {
        let plc = Arc::new(SimulatedServer::new("opc.tcp://plc:4840").with_node(FLOW, Value::Int32(120), true));
        let hist = Arc::new(SimulatedServer::new("opc.hda://hist"));
        let provider = SimulatedTransportProvider::new()
            .with_server("plc", plc.clone())
            .with_server("hist", hist.clone());
        let connections = Arc::new(ConnectionManager::new(
            ClientFactory::new(Arc::new(provider)),
            fast_policies(2),
            Arc::new(TracingStatusSink),
        ));
        let cancel = CancellationToken::new();
        connections
            .initialize_connections(
                &[
                    ServerConnectionConfig::new("plc", "ua", "opc.tcp://plc:4840"),
                    ServerConnectionConfig::new("hist", "hda", "opc.hda://hist"),
                ],
                &cancel,
            )
            .await;

        let mut flow = TagDefinition::new("flow", "plc", FLOW);
        flow.data_type = DataType::Int32;
        flow.scale = 0.5;
        flow.writable = true;
        let tags = Arc::new(TagRegistry::new(vec![flow, TagDefinition::new("hist_flow", "hist", FLOW)]));
        let buffer = Arc::new(DataBuffer::new(100));
        let subscriptions = Arc::new(SubscriptionManager::new(
            "client-1",
            connections.clone(),
            tags.clone(),
            buffer,
            SubscriptionDefaults::default(),
            &BufferConfig::default(),
        ));
        let writes = Arc::new(WritePipeline::new(
            connections.clone(),
            tags.clone(),
            &WriteConfig::default(),
            Arc::new(CriticalWriteAuditor::new("client-1", Arc::new(InMemoryAuditLogger::new(10)))),
        ));

        Fixture {
            plc,
            hist,
            service: CommandService::new(connections, tags, subscriptions, writes),
            cancel,
        }
    }

    #[tokio::test]
    async fn test_read_tags_scales_values() {
        let f = fixture().await;
        let points = f
            .service
            .read_tags(&"plc".into(), &[TagId::new("flow")], &f.cancel)
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, Value::Float64(60.0));
        assert_eq!(points[0].quality, Quality::Good);
        assert!(points[0].source_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_read_is_retried() {
        let f = fixture().await;
        f.plc.fail_next_reads(2);
        let points = f
            .service
            .read_tags(&"plc".into(), &[TagId::new("flow")], &f.cancel)
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(f.plc.read_calls(), 3);
    }

    #[tokio::test]
    async fn test_read_rejects_foreign_and_unknown_tags() {
        let f = fixture().await;
        let plc: ServerId = "plc".into();
        assert!(matches!(
            f.service.read_tags(&plc, &[TagId::new("nope")], &f.cancel).await,
            Err(CommandError::UnknownTag { .. })
        ));
        assert!(matches!(
            f.service.read_tags(&plc, &[TagId::new("hist_flow")], &f.cancel).await,
            Err(CommandError::TagServerMismatch { .. })
        ));
        assert!(matches!(
            f.service.read_tags(&"x".into(), &[], &f.cancel).await,
            Err(CommandError::UnknownServer { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_commands() {
        let f = fixture().await;
        f.cancel.cancel();
        let plc: ServerId = "plc".into();
        assert!(matches!(
            f.service.read_tags(&plc, &[TagId::new("flow")], &f.cancel).await,
            Err(CommandError::Cancelled)
        ));
        let request = WriteRequest::new("plc", WriteContext::new("alice")).with_item("flow", Value::Float64(1.0));
        assert!(matches!(
            f.service.write_tags(&plc, request, &f.cancel).await,
            Err(CommandError::Cancelled)
        ));
        assert_eq!(f.plc.read_calls(), 0);
        assert_eq!(f.plc.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_write_tags() {
        let f = fixture().await;
        let plc: ServerId = "plc".into();
        let request = WriteRequest::new("plc", WriteContext::new("alice")).with_item("flow", Value::Float64(30.0));
        let result = f.service.write_tags(&plc, request, &f.cancel).await.unwrap();
        assert!(result.is_success());
        assert_eq!(f.plc.writes(), vec![(FLOW.to_string(), Value::Int32(60))]);

        let wrong = WriteRequest::new("hist", WriteContext::new("alice"));
        assert!(matches!(
            f.service.write_tags(&plc, wrong, &f.cancel).await,
            Err(CommandError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_history_query() {
        let f = fixture().await;
        let now = Utc::now();
        for i in 0..5 {
            f.hist
                .add_history(FLOW, now - ChronoDuration::minutes(10 - i), Value::Float64(i as f64));
        }

        let query = HistoricalQuery {
            tag_ids: vec![TagId::new("hist_flow")],
            start: now - ChronoDuration::hours(1),
            end: now,
            max_values: 3,
        };
        let points = f
            .service
            .query_historical_data(&"hist".into(), &query, &f.cancel)
            .await
            .unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.tag_id.as_str() == "hist_flow"));

        let inverted = HistoricalQuery {
            start: now,
            end: now - ChronoDuration::hours(1),
            ..query
        };
        assert!(matches!(
            f.service.query_historical_data(&"hist".into(), &inverted, &f.cancel).await,
            Err(CommandError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_acknowledge_is_not_retried() {
        let f = fixture().await;
        let plc: ServerId = "plc".into();
        let context = AckContext {
            user_id: "alice".into(),
            comment: "checked".into(),
        };

        f.plc.raise_alarm("evt-1", "Line1.Pump", "Pump tripped", 700);
        f.service
            .acknowledge_alarm(&plc, "evt-1", &context, &f.cancel)
            .await
            .unwrap();
        assert_eq!(f.plc.event_state("evt-1"), Some(AckState::Acknowledged));

        let err = f
            .service
            .acknowledge_alarm(&plc, "evt-unknown", &context, &f.cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Client(_)));
        assert_eq!(f.plc.ack_calls(), 2);
    }

    #[tokio::test]
    async fn test_capabilities_are_checked() {
        let f = fixture().await;
        let context = AckContext::default();
        assert!(matches!(
            f.service
                .acknowledge_alarm(&"hist".into(), "evt-1", &context, &f.cancel)
                .await,
            Err(CommandError::Unsupported { .. })
        ));
    }
}
