// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Assembly of the client core.
//!
//! [`OpcClientCore`] wires every component from one [`ClientConfig`]:
//!
//! ```text
//!                ┌───────────────────┐
//!   commands ──▶ │  CommandService   │──┬──▶ WritePipeline ──▶ CriticalWriteAuditor
//!                └───────────────────┘  │
//!                                       ├──▶ SubscriptionManager ◀── client events
//!                                       │            │
//!                                       └──▶ ConnectionManager       ▼
//!                                                              DataBuffer ──▶ BufferDrainer ──▶ OutboundSink
//!                                                                   ▲
//!                                              ClientHealthMonitor ─┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let core = OpcClientCore::builder(config)
//!     .transport_provider(Arc::new(provider))
//!     .sink(Arc::new(LoggingSink))
//!     .build()?;
//!
//! let report = core.start().await;
//! // ...
//! core.shutdown(Duration::from_secs(10)).await;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opcc_buffer::{BufferDrainer, DataBuffer, OverflowPolicy};
use opcc_config::ClientConfig;
use opcc_core::audit::{AuditLogger, TracingAuditLogger};
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::resilience::ResiliencePolicies;
use opcc_core::scheduler::{PeriodicTask, Scheduler};
use opcc_core::sink::{LoggingSink, OutboundSink};
use opcc_core::types::{ServerId, SubscriptionId};
use opcc_protocol::{ClientFactory, NoTransportProvider, TransportProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::{StatusSink, TracingStatusSink};
use crate::health::ClientHealthMonitor;
use crate::manager::{ClientEventHandler, ConnectionManager, DisconnectReport, InitializationReport};
use crate::service::CommandService;
use crate::subscription::SubscriptionManager;
use crate::tags::TagRegistry;
use crate::write::{CriticalWriteAuditor, WritePipeline};

/// How often idle rate-limit buckets are dropped.
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// StartReport
// =============================================================================

/// Outcome of [`OpcClientCore::start`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartReport {
    /// Per-server connection results.
    pub connections: InitializationReport,
    /// Configured subscriptions that were registered or left pending.
    pub subscriptions: Vec<SubscriptionId>,
    /// Configured subscriptions that were rejected.
    pub subscription_failures: Vec<(ServerId, String)>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`OpcClientCore`].
pub struct OpcClientCoreBuilder {
    config: ClientConfig,
    provider: Arc<dyn TransportProvider>,
    sink: Arc<dyn OutboundSink>,
    audit_logger: Arc<dyn AuditLogger>,
    status_sink: Arc<dyn StatusSink>,
}

impl OpcClientCoreBuilder {
    /// Sets the session transport provider.
    pub fn transport_provider(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Sets the outbound sink.
    pub fn sink(mut self, sink: Arc<dyn OutboundSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the critical-write audit logger.
    pub fn audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit_logger = logger;
        self
    }

    /// Sets the connection status sink.
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    /// Validates the configuration and assembles the core.
    pub fn build(self) -> ClientResult<OpcClientCore> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| ClientError::configuration(e.to_string()))?;

        let client_id = config.client.id.clone();
        let tasks = CancellationToken::new();
        let policies = ResiliencePolicies::from_config(&config.resilience);

        let tags = Arc::new(TagRegistry::new(config.tags.iter().cloned()));
        let buffer = Arc::new(DataBuffer::from_config(&config.buffer));
        let connections = Arc::new(ConnectionManager::new(
            ClientFactory::new(self.provider),
            policies.clone(),
            self.status_sink,
        ));

        let subscriptions = Arc::new(SubscriptionManager::new(
            client_id.clone(),
            connections.clone(),
            tags.clone(),
            buffer.clone(),
            config.subscription_defaults.clone(),
            &config.buffer,
        ));
        let handler: Arc<dyn ClientEventHandler> = subscriptions.clone();
        connections.set_event_handler(handler);

        let auditor = Arc::new(
            CriticalWriteAuditor::new(client_id.clone(), self.audit_logger)
                .with_buffer(buffer.clone(), OverflowPolicy::DiscardOldest),
        );
        let writes = Arc::new(WritePipeline::new(
            connections.clone(),
            tags.clone(),
            &config.write,
            auditor.clone(),
        ));

        let drainer = Arc::new(BufferDrainer::new(
            buffer.clone(),
            self.sink,
            policies.generic.clone(),
            config.buffer.drain_batch_size,
            tasks.child_token(),
        ));
        let health = Arc::new(
            ClientHealthMonitor::new(
                client_id,
                connections.clone(),
                subscriptions.clone(),
                buffer.clone(),
                tasks.child_token(),
            )
            .with_drainer(drainer.clone())
            .with_auditor(auditor.clone())
            .with_publishing(config.health.publish),
        );

        let commands = Arc::new(CommandService::new(
            connections.clone(),
            tags.clone(),
            subscriptions.clone(),
            writes.clone(),
        ));

        Ok(OpcClientCore {
            config: Arc::new(config),
            tags,
            buffer,
            connections,
            subscriptions,
            auditor,
            writes,
            drainer,
            health,
            commands,
            tasks,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}

// =============================================================================
// OpcClientCore
// =============================================================================

/// The assembled client core.
pub struct OpcClientCore {
    config: Arc<ClientConfig>,
    tags: Arc<TagRegistry>,
    buffer: Arc<DataBuffer>,
    connections: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionManager>,
    auditor: Arc<CriticalWriteAuditor>,
    writes: Arc<WritePipeline>,
    drainer: Arc<BufferDrainer>,
    health: Arc<ClientHealthMonitor>,
    commands: Arc<CommandService>,
    tasks: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl OpcClientCore {
    /// Starts building a core from `config`.
    ///
    /// Defaults: no session transport, [`LoggingSink`],
    /// [`TracingAuditLogger`] and [`TracingStatusSink`].
    pub fn builder(config: ClientConfig) -> OpcClientCoreBuilder {
        OpcClientCoreBuilder {
            config,
            provider: Arc::new(NoTransportProvider),
            sink: Arc::new(LoggingSink),
            audit_logger: Arc::new(TracingAuditLogger),
            status_sink: Arc::new(TracingStatusSink),
        }
    }

    /// Connects the configured servers, registers the configured
    /// subscriptions and starts the periodic tasks.
    ///
    /// Unreachable servers do not fail startup; the health monitor keeps
    /// retrying them. Calling `start` twice returns an empty report.
    pub async fn start(&self) -> StartReport {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Client core already started");
            return StartReport::default();
        }

        info!(
            client_id = %self.config.client.id,
            servers = self.config.servers.len(),
            tags = self.tags.len(),
            subscriptions = self.config.subscriptions.len(),
            "Starting OPC client core"
        );

        let cancel = self.tasks.child_token();
        let connections = self
            .connections
            .initialize_connections(&self.config.servers, &cancel)
            .await;

        let mut report = StartReport {
            connections,
            ..Default::default()
        };
        let results = self
            .subscriptions
            .create_configured(&self.config.subscriptions, &cancel)
            .await;
        for (config, result) in self.config.subscriptions.iter().zip(results) {
            match result {
                Ok(id) => report.subscriptions.push(id),
                Err(e) => report
                    .subscription_failures
                    .push((config.server_id.clone(), e.to_string())),
            }
        }

        let periodic: [(Arc<dyn PeriodicTask>, Duration); 3] = [
            (self.drainer.clone(), self.config.buffer.drain_interval),
            (self.health.clone(), self.config.health.interval),
            (self.writes.clone(), RATE_LIMIT_CLEANUP_INTERVAL),
        ];
        let mut handles = self.handles.lock();
        for (task, period) in periodic {
            handles.push(Scheduler::spawn(task, period, self.tasks.child_token()));
        }
        drop(handles);

        info!(
            connected = report.connections.connected.len(),
            failed = report.connections.failed.len(),
            disabled = report.connections.disabled.len(),
            subscriptions = report.subscriptions.len(),
            "OPC client core started"
        );
        report
    }

    /// Stops the periodic tasks, flushes audits, drains the buffer and
    /// disconnects every server.
    ///
    /// `grace` bounds the wait for the periodic tasks and for the
    /// disconnects separately. A second call returns an empty report.
    pub async fn shutdown(&self, grace: Duration) -> DisconnectReport {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return DisconnectReport::default();
        }
        info!(grace_ms = grace.as_millis() as u64, "Shutting down OPC client core");

        self.auditor.flush().await;

        self.tasks.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let stopped = tokio::time::timeout(grace, futures::future::join_all(handles)).await;
        if stopped.is_err() {
            warn!("Periodic tasks did not stop within the grace period");
        }
        if !self.started.load(Ordering::SeqCst) || stopped.is_err() {
            self.drainer.drain_all(&CancellationToken::new()).await;
        }

        let report = self.connections.disconnect_all(grace).await;
        if !self.buffer.is_empty() {
            warn!(remaining = self.buffer.len(), "Records left undelivered at shutdown");
        }
        self.buffer.close();
        report
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Inbound command surface.
    pub fn commands(&self) -> &Arc<CommandService> {
        &self.commands
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Subscription manager.
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Write pipeline.
    pub fn writes(&self) -> &Arc<WritePipeline> {
        &self.writes
    }

    /// Health monitor.
    pub fn health(&self) -> &Arc<ClientHealthMonitor> {
        &self.health
    }

    /// Outbound buffer.
    pub fn buffer(&self) -> &Arc<DataBuffer> {
        &self.buffer
    }

    /// Buffer drainer.
    pub fn drainer(&self) -> &Arc<BufferDrainer> {
        &self.drainer
    }

    /// Tag registry.
    pub fn tags(&self) -> &Arc<TagRegistry> {
        &self.tags
    }
}

impl fmt::Debug for OpcClientCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcClientCore")
            .field("client_id", &self.config.client.id)
            .field("servers", &self.connections.count())
            .field("subscriptions", &self.subscriptions.len())
            .field("buffered", &self.buffer.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
