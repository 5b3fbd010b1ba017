// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC Alarms & Conditions adapter.
//!
//! Subscriptions on an AC server are event subscriptions: they carry no
//! monitored items and deliver [`ClientEvent::Alarm`] notifications.

use std::sync::Arc;

use async_trait::async_trait;
use opcc_config::ServerConnectionConfig;
use opcc_core::client::{BrowseEntry, Capabilities, ClientEvent, ProtocolClient, SubscriptionParams};
use opcc_core::error::ClientResult;
use opcc_core::types::{ProtocolKind, ServerId};
use tokio::sync::mpsc;

use crate::session::{AdapterSession, SessionStats};
use crate::transport::SessionTransport;

/// OPC AC client: event subscriptions, area browsing and acknowledgement.
#[derive(Debug)]
pub struct AcClient {
    session: AdapterSession,
}

impl AcClient {
    /// Creates a disconnected client.
    pub fn new(config: ServerConnectionConfig, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            session: AdapterSession::new(ProtocolKind::Ac, config, transport),
        }
    }

    /// Service call counters.
    pub fn stats(&self) -> &SessionStats {
        self.session.stats()
    }
}

#[async_trait]
impl ProtocolClient for AcClient {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Ac
    }

    fn server_id(&self) -> &ServerId {
        self.session.server_id()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::AC
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

    async fn create_subscription(&self, params: &SubscriptionParams) -> ClientResult<u32> {
        self.session.create_subscription(params).await
    }

    async fn delete_subscription(&self, subscription: u32) -> ClientResult<()> {
        self.session.delete_subscription(subscription).await
    }

    async fn browse(&self, parent: Option<&str>) -> ClientResult<Vec<BrowseEntry>> {
        self.session.browse(parent).await
    }

    async fn acknowledge(&self, event_id: &str, comment: &str) -> ClientResult<()> {
        self.session.acknowledge(event_id, comment).await
    }
}
