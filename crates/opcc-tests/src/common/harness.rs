// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A started [`OpcClientCore`] wired to simulated servers, a recording
//! outbound sink and an in-memory audit logger.
//!
//! ## Example
//!
//! ```rust,ignore
//! use opcc_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_harness() {
//!     let harness = TestHarness::start(ConfigBuilder::plant()).await;
//!     harness.plc().set_value(TEMP_ADDRESS, Value::Float64(75.0));
//!
//!     let points = harness.wait_for_data_points("boiler_temp", 1).await;
//!     assert_eq!(points[0].value, Value::Float64(75.0));
//!
//!     harness.shutdown().await;
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opcc_client::{DisconnectReport, OpcClientCore, StartReport, StatusSink, TracingStatusSink};
use opcc_config::ClientConfig;
use opcc_core::audit::{AuditLogger, InMemoryAuditLogger};
use opcc_core::sink::{MemorySink, OutboundPayload, OutboundRecord, RecordKind};
use opcc_core::types::{DataPoint, ServerId};
use opcc_protocol::{SimulatedServer, SimulatedTransportProvider};
use tokio_util::sync::CancellationToken;

use super::fixtures::{SimulatedFixtures, ALARMS, HISTORIAN, PLC};
use super::{init_test_logging, wait_until};

/// Default wait for asynchronous effects.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// TestHarnessBuilder
// =============================================================================

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    config: ClientConfig,
    servers: HashMap<String, Arc<SimulatedServer>>,
    audit_logger: Option<Arc<dyn AuditLogger>>,
    status_sink: Arc<dyn StatusSink>,
}

impl TestHarnessBuilder {
    /// Registers a simulated server under `id`, replacing any fixture.
    pub fn server(mut self, id: &str, server: Arc<SimulatedServer>) -> Self {
        self.servers.insert(id.to_string(), server);
        self
    }

    /// Replaces the in-memory audit logger.
    pub fn audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit_logger = Some(logger);
        self
    }

    /// Replaces the status sink.
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    /// Builds the core without starting it.
    pub fn build(self) -> TestHarness {
        init_test_logging();

        let mut servers = self.servers;
        for server in &self.config.servers {
            let id = server.id.as_str();
            if servers.contains_key(id) {
                continue;
            }
            let simulated = match id {
                PLC => SimulatedFixtures::plc(),
                HISTORIAN => SimulatedFixtures::historian(24),
                ALARMS => SimulatedFixtures::alarms(),
                _ => Arc::new(SimulatedServer::new(server.endpoint.clone())),
            };
            servers.insert(id.to_string(), simulated);
        }

        let provider = SimulatedTransportProvider::new();
        for (id, server) in &servers {
            provider.register(id.clone(), server.clone());
        }

        let sink = Arc::new(MemorySink::new());
        let audit = Arc::new(InMemoryAuditLogger::new(1000));
        let audit_logger = self.audit_logger.unwrap_or_else(|| audit.clone());

        let core = OpcClientCore::builder(self.config)
            .transport_provider(Arc::new(provider))
            .sink(sink.clone())
            .audit_logger(audit_logger)
            .status_sink(self.status_sink)
            .build()
            .expect("Failed to build client core");

        TestHarness {
            core,
            sink,
            audit,
            servers,
            cancel: CancellationToken::new(),
            report: StartReport::default(),
        }
    }

    /// Builds and starts the core.
    pub async fn start(self) -> TestHarness {
        let mut harness = self.build();
        harness.report = harness.core.start().await;
        harness
    }
}

// =============================================================================
// TestHarness
// =============================================================================

/// A client core under test.
pub struct TestHarness {
    /// The core.
    pub core: OpcClientCore,
    /// Receives every drained record.
    pub sink: Arc<MemorySink>,
    /// Receives critical-write records unless replaced.
    pub audit: Arc<InMemoryAuditLogger>,
    /// Simulated servers by id.
    pub servers: HashMap<String, Arc<SimulatedServer>>,
    /// Token for commands issued by the test.
    pub cancel: CancellationToken,
    /// Report of the last start.
    pub report: StartReport,
}

impl TestHarness {
    /// Starts a builder for `config`.
    pub fn builder(config: impl Into<ClientConfig>) -> TestHarnessBuilder {
        TestHarnessBuilder {
            config: config.into(),
            servers: HashMap::new(),
            audit_logger: None,
            status_sink: Arc::new(TracingStatusSink),
        }
    }

    /// Builds and starts a core with fixture servers.
    pub async fn start(config: impl Into<ClientConfig>) -> Self {
        Self::builder(config).start().await
    }

    /// The simulated server registered under `id`.
    pub fn server(&self, id: &str) -> &Arc<SimulatedServer> {
        self.servers
            .get(id)
            .unwrap_or_else(|| panic!("no simulated server '{}'", id))
    }

    /// The line controller.
    pub fn plc(&self) -> &Arc<SimulatedServer> {
        self.server(PLC)
    }

    /// Connection status of `id`.
    pub fn status(&self, id: &str) -> opcc_core::status::ConnectionStatus {
        self.core
            .connections()
            .get(&ServerId::new(id))
            .unwrap_or_else(|| panic!("no connection '{}'", id))
            .status()
    }

    /// Records delivered to the sink so far.
    pub fn delivered(&self) -> Vec<OutboundRecord> {
        self.sink.records()
    }

    /// Delivered records of one kind.
    pub fn delivered_of(&self, kind: RecordKind) -> Vec<OutboundRecord> {
        self.delivered().into_iter().filter(|r| r.kind() == kind).collect()
    }

    /// Delivered data points of `tag_id`, in delivery order.
    pub fn data_points(&self, tag_id: &str) -> Vec<DataPoint> {
        self.delivered()
            .into_iter()
            .filter_map(|r| match r.payload {
                OutboundPayload::DataPoint(p) if p.tag_id.as_str() == tag_id => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Waits until at least `count` data points of `tag_id` were delivered.
    pub async fn wait_for_data_points(&self, tag_id: &str, count: usize) -> Vec<DataPoint> {
        let reached = wait_until(DEFAULT_WAIT, || self.data_points(tag_id).len() >= count).await;
        let points = self.data_points(tag_id);
        assert!(
            reached,
            "expected {} data points for '{}', got {:?}",
            count,
            tag_id,
            points
        );
        points
    }

    /// Waits until a record of `kind` was delivered.
    pub async fn wait_for_record(&self, kind: RecordKind) -> OutboundRecord {
        let reached = wait_until(DEFAULT_WAIT, || !self.delivered_of(kind).is_empty()).await;
        assert!(reached, "no {:?} record delivered", kind);
        self.delivered_of(kind).remove(0)
    }

    /// Shuts the core down within the configured grace period.
    pub async fn shutdown(&self) -> DisconnectReport {
        self.cancel.cancel();
        self.core.shutdown(self.core.config().shutdown.grace_period).await
    }
}
