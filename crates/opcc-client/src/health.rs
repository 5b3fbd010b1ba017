// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Periodic client health snapshots.
//!
//! Each cycle of the [`ClientHealthMonitor`]:
//!
//! 1. makes one reconnect attempt for servers in `Error`
//! 2. recomputes subscription statuses
//! 3. builds a [`ClientHealthStatus`] and stores it for [`latest`](ClientHealthMonitor::latest)
//! 4. publishes the snapshot and the subscription statuses to the buffer

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use opcc_buffer::{BufferDrainer, DataBuffer, OverflowPolicy};
use opcc_core::scheduler::PeriodicTask;
use opcc_core::sink::OutboundRecord;
use opcc_core::status::{
    ClientHealthStatus, ConnectionStatus, OverallStatus, ResourceMetrics, ServerHealth, SubscriptionStatus,
    SubscriptionStatusReport,
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::ConnectionManager;
use crate::subscription::SubscriptionManager;
use crate::write::CriticalWriteAuditor;

// =============================================================================
// Overall status
// =============================================================================

/// Aggregates connection and subscription states.
///
/// `servers` holds `(enabled, status)` per registered server.
pub fn overall_status(servers: &[(bool, ConnectionStatus)], subscriptions: &[SubscriptionStatusReport]) -> OverallStatus {
    let enabled: Vec<_> = servers.iter().filter(|(enabled, _)| *enabled).map(|(_, s)| *s).collect();
    if enabled.is_empty() {
        return OverallStatus::Healthy;
    }

    let connected = enabled.iter().filter(|s| s.is_connected()).count();
    if connected == 0 {
        return OverallStatus::Unhealthy;
    }

    let subscriptions_ok = subscriptions
        .iter()
        .all(|r| matches!(r.status, SubscriptionStatus::Active | SubscriptionStatus::NoConfig));
    if connected == enabled.len() && subscriptions_ok {
        OverallStatus::Healthy
    } else {
        OverallStatus::Degraded
    }
}

/// Resident set size from `/proc/self/statm`.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    const PAGE_SIZE: u64 = 4096;
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * PAGE_SIZE)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

// =============================================================================
// ClientHealthMonitor
// =============================================================================

/// Builds and publishes [`ClientHealthStatus`] snapshots.
pub struct ClientHealthMonitor {
    client_id: String,
    connections: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionManager>,
    buffer: Arc<DataBuffer>,
    drainer: Option<Arc<BufferDrainer>>,
    auditor: Option<Arc<CriticalWriteAuditor>>,
    publish: bool,
    reconnect: bool,
    started: Instant,
    latest: RwLock<Option<ClientHealthStatus>>,
    cancel: CancellationToken,
}

impl ClientHealthMonitor {
    /// Creates a monitor that publishes snapshots and retries failed servers.
    pub fn new(
        client_id: impl Into<String>,
        connections: Arc<ConnectionManager>,
        subscriptions: Arc<SubscriptionManager>,
        buffer: Arc<DataBuffer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            connections,
            subscriptions,
            buffer,
            drainer: None,
            auditor: None,
            publish: true,
            reconnect: true,
            started: Instant::now(),
            latest: RwLock::new(None),
            cancel,
        }
    }

    /// Reports delivery counters from `drainer`.
    pub fn with_drainer(mut self, drainer: Arc<BufferDrainer>) -> Self {
        self.drainer = Some(drainer);
        self
    }

    /// Reports audit failures from `auditor`.
    pub fn with_auditor(mut self, auditor: Arc<CriticalWriteAuditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    /// Enables or disables publishing to the buffer.
    pub fn with_publishing(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    /// Enables or disables reconnect attempts.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The last snapshot.
    pub fn latest(&self) -> Option<ClientHealthStatus> {
        self.latest.read().clone()
    }

    /// Builds a snapshot without storing or publishing it.
    pub fn collect(&self) -> ClientHealthStatus {
        let policy = &self.connections.policies().server_communication;
        let mut states = Vec::new();
        let servers: Vec<ServerHealth> = self
            .connections
            .snapshots()
            .into_iter()
            .map(|snapshot| {
                let enabled = self
                    .connections
                    .get(&snapshot.server_id)
                    .map(|c| c.config().enabled)
                    .unwrap_or(false);
                states.push((enabled, snapshot.status));
                ServerHealth {
                    breaker_state: policy.breaker_state(snapshot.server_id.as_str()),
                    server_id: snapshot.server_id,
                    protocol: snapshot.protocol,
                    status: snapshot.status,
                    last_change: snapshot.last_change,
                    last_error: snapshot.last_error,
                }
            })
            .collect();

        let subscriptions = self.subscriptions.statuses();
        let overall = overall_status(&states, &subscriptions);

        let resources = ResourceMetrics {
            uptime_secs: self.started.elapsed().as_secs(),
            resident_memory_bytes: resident_memory_bytes(),
            buffer_dropped: self.buffer.stats().items_dropped(),
            records_published: self
                .drainer
                .as_ref()
                .map(|d| d.metrics().records_published)
                .unwrap_or(0),
            audit_failures: self.auditor.as_ref().map(|a| a.metrics().failed).unwrap_or(0),
        };

        ClientHealthStatus {
            client_id: self.client_id.clone(),
            overall,
            servers,
            subscriptions,
            buffered_items: self.buffer.len(),
            resources,
            timestamp: Utc::now(),
        }
    }

    /// Runs one full cycle and returns the snapshot.
    pub async fn check(&self) -> ClientHealthStatus {
        if self.reconnect {
            for (server_id, result) in self.connections.reconnect_failed(&self.cancel).await {
                if let Err(e) = result {
                    debug!(server_id = %server_id, error = %e, "Reconnect attempt failed");
                }
            }
        }

        let status = self.collect();
        let previous = self.latest.write().replace(status.clone());
        match previous.map(|p| p.overall) {
            Some(before) if before == status.overall => {}
            before => info!(
                from = ?before,
                to = %status.overall,
                connected = self.connections.connected_count(),
                servers = status.servers.len(),
                "Client health changed"
            ),
        }

        if self.publish {
            self.publish(&status);
        }
        status
    }

    fn publish(&self, status: &ClientHealthStatus) {
        for report in &status.subscriptions {
            let record = OutboundRecord::subscription_status(&self.client_id, report.clone());
            if let Err(e) = self.buffer.push(record, OverflowPolicy::DiscardOldest) {
                debug!(error = %e, "Subscription status not buffered");
            }
        }
        if let Err(e) = self
            .buffer
            .push(OutboundRecord::health(status.clone()), OverflowPolicy::DiscardOldest)
        {
            warn!(error = %e, "Health snapshot not buffered");
        }
    }
}

#[async_trait]
impl PeriodicTask for ClientHealthMonitor {
    fn name(&self) -> &str {
        "health-monitor"
    }

    async fn run_once(&self) {
        let status = self.check().await;
        debug!(
            overall = %status.overall,
            buffered = status.buffered_items,
            subscriptions = status.subscriptions.len(),
            "Health snapshot"
        );
    }
}
