// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC HDA adapter.
//!
//! HDA servers expose history only. A current-value read is answered with the
//! newest sample of each item; items without history read as `BadNoData`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opcc_config::ServerConnectionConfig;
use opcc_core::client::{
    BrowseEntry, Capabilities, ClientEvent, HistoryQuery, HistoryValue, ProtocolClient, ReadValue,
};
use opcc_core::error::ClientResult;
use opcc_core::types::{ProtocolKind, ServerId, Value};
use tokio::sync::mpsc;

use crate::conversion::StatusCode;
use crate::session::{AdapterSession, SessionStats};
use crate::transport::SessionTransport;

/// OPC HDA client: history reads, latest-value reads and browsing.
#[derive(Debug)]
pub struct HdaClient {
    session: AdapterSession,
}

impl HdaClient {
    /// Creates a disconnected client.
    pub fn new(config: ServerConnectionConfig, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            session: AdapterSession::new(ProtocolKind::Hda, config, transport),
        }
    }

    /// Service call counters.
    pub fn stats(&self) -> &SessionStats {
        self.session.stats()
    }
}

#[async_trait]
impl ProtocolClient for HdaClient {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Hda
    }

    fn server_id(&self) -> &ServerId {
        self.session.server_id()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::HDA
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
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let query = HistoryQuery {
            addresses: addresses.to_vec(),
            start: DateTime::<Utc>::MIN_UTC,
            end: Utc::now(),
            max_values: 0,
        };
        let history = self.session.read_history(&query).await?;

        Ok(addresses
            .iter()
            .map(|address| {
                let latest = history
                    .iter()
                    .filter(|h| &h.address == address)
                    .max_by_key(|h| h.timestamp);
                match latest {
                    Some(h) => ReadValue {
                        address: address.clone(),
                        value: h.value.clone(),
                        quality: h.quality.clone(),
                        source_timestamp: Some(h.timestamp),
                    },
                    None => ReadValue {
                        address: address.clone(),
                        value: Value::Null,
                        quality: StatusCode::BAD_NO_DATA.to_quality(),
                        source_timestamp: None,
                    },
                }
            })
            .collect())
    }

    async fn browse(&self, parent: Option<&str>) -> ClientResult<Vec<BrowseEntry>> {
        self.session.browse(parent).await
    }

    async fn read_history(&self, query: &HistoryQuery) -> ClientResult<Vec<HistoryValue>> {
        self.session.read_history(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use opcc_core::client::WriteItem;
    use opcc_core::error::ClientError;
    use opcc_core::types::Quality;

    use crate::simulated::SimulatedServer;

    #[tokio::test]
    async fn test_latest_value_read() {
        let server = Arc::new(SimulatedServer::new("opc.hda://historian"));
        let now = Utc::now();
        server.add_history("Flow", now - Duration::minutes(3), Value::Float64(1.0));
        server.add_history("Flow", now - Duration::minutes(1), Value::Float64(2.0));

        let client = HdaClient::new(
            ServerConnectionConfig::new("hist", "hda", "opc.hda://historian"),
            server.clone(),
        );
        client.connect().await.unwrap();

        let values = client.read(&["Flow".into(), "Level".into()]).await.unwrap();
        assert_eq!(values[0].value, Value::Float64(2.0));
        assert_eq!(values[0].quality, Quality::Good);
        assert_eq!(values[1].quality, Quality::Bad("BadNoData".into()));
    }

    #[tokio::test]
    async fn test_write_is_unsupported() {
        let server = Arc::new(SimulatedServer::new("opc.hda://historian"));
        let client = HdaClient::new(
            ServerConnectionConfig::new("hist", "hda", "opc.hda://historian"),
            server,
        );
        client.connect().await.unwrap();

        let err = client
            .write(&[WriteItem {
                address: "Flow".into(),
                value: Value::Float64(1.0),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unsupported { protocol: "hda", .. }));
        assert!(!client.capabilities().subscriptions);
    }
}
