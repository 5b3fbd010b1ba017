// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA adapter.

use std::sync::Arc;

use async_trait::async_trait;
use opcc_config::ServerConnectionConfig;
use opcc_core::client::{
    BrowseEntry, Capabilities, ClientEvent, HistoryQuery, HistoryValue, MonitoredItemRequest,
    MonitoredItemResult, ProtocolClient, ReadValue, SubscriptionParams, WriteItem,
};
use opcc_core::error::ClientResult;
use opcc_core::types::{ProtocolKind, ServerId};
use tokio::sync::mpsc;

use crate::session::{AdapterSession, SessionStats};
use crate::transport::SessionTransport;

/// OPC UA client with the full capability set.
///
/// Deadband settings travel with each monitored-item request; the server
/// applies them before sampling.
#[derive(Debug)]
pub struct UaClient {
    session: AdapterSession,
}

impl UaClient {
    /// Creates a disconnected client.
    pub fn new(config: ServerConnectionConfig, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            session: AdapterSession::new(ProtocolKind::Ua, config, transport),
        }
    }

    /// Service call counters.
    pub fn stats(&self) -> &SessionStats {
        self.session.stats()
    }
}

#[async_trait]
impl ProtocolClient for UaClient {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Ua
    }

    fn server_id(&self) -> &ServerId {
        self.session.server_id()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::UA
    }

    async fn connect(&self) -> ClientResult<()> {
        self.session.connect().await
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.session.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.session.take_events()
    }

    async fn read(&self, addresses: &[String]) -> ClientResult<Vec<ReadValue>> {
        self.session.read(addresses).await
    }

    async fn write(&self, items: &[WriteItem]) -> ClientResult<Vec<ClientResult<()>>> {
        self.session.write(items).await
    }

    async fn create_subscription(&self, params: &SubscriptionParams) -> ClientResult<u32> {
        self.session.create_subscription(params).await
    }

    async fn add_monitored_items(
        &self,
        subscription: u32,
        items: &[MonitoredItemRequest],
    ) -> ClientResult<Vec<MonitoredItemResult>> {
        self.session.add_monitored_items(subscription, items).await
    }

    async fn delete_subscription(&self, subscription: u32) -> ClientResult<()> {
        self.session.delete_subscription(subscription).await
    }

    async fn browse(&self, parent: Option<&str>) -> ClientResult<Vec<BrowseEntry>> {
        self.session.browse(parent).await
    }

    async fn read_history(&self, query: &HistoryQuery) -> ClientResult<Vec<HistoryValue>> {
        self.session.read_history(query).await
    }

    async fn acknowledge(&self, event_id: &str, comment: &str) -> ClientResult<()> {
        self.session.acknowledge(event_id, comment).await
    }
}
