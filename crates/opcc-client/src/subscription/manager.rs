// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcc_buffer::{DataBuffer, OverflowPolicy};
use opcc_config::{BufferConfig, SubscriptionConfig, SubscriptionDefaults};
use opcc_core::client::{ClientEvent, ProtocolClient};
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::sink::OutboundRecord;
use opcc_core::status::{SubscriptionStatus, SubscriptionStatusReport};
use opcc_core::types::{ServerId, SubscriptionId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::deadband::DeadbandFilter;
use super::queue::ItemQueue;
use super::registry::{MonitoredItem, SubscriptionEntry, SubscriptionRegistry};
use super::SubscriptionError;
use crate::manager::{ClientEventHandler, ConnectionManager};
use crate::tags::TagRegistry;

/// Creates, restores and reports subscriptions across all servers.
///
/// Registered as the [`ConnectionManager`]'s event handler, it turns client
/// notifications into outbound records and re-registers a server's
/// subscriptions whenever its connection comes back.
pub struct SubscriptionManager {
    client_id: String,
    connections: Arc<ConnectionManager>,
    tags: Arc<TagRegistry>,
    buffer: Arc<DataBuffer>,
    registry: SubscriptionRegistry,
    defaults: SubscriptionDefaults,
    producer_wait: Duration,
    alarm_policy: OverflowPolicy,
    next_id: AtomicU64,
    next_handle: AtomicU32,
    dropped: AtomicU64,
}

impl SubscriptionManager {
    /// Creates a manager without subscriptions.
    pub fn new(
        client_id: impl Into<String>,
        connections: Arc<ConnectionManager>,
        tags: Arc<TagRegistry>,
        buffer: Arc<DataBuffer>,
        defaults: SubscriptionDefaults,
        buffer_config: &BufferConfig,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            connections,
            tags,
            buffer,
            registry: SubscriptionRegistry::new(),
            defaults,
            producer_wait: buffer_config.producer_wait,
            alarm_policy: OverflowPolicy::from_discard_oldest(buffer_config.discard_oldest),
            next_id: AtomicU64::new(1),
            next_handle: AtomicU32::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// The subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns `true` if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Notifications lost to item queue or buffer overflow.
    pub fn notifications_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Create / remove
    // =========================================================================

    /// Creates a subscription on a connected server.
    ///
    /// # Errors
    ///
    /// Configuration problems, a disconnected or non-subscribing server, and
    /// protocol failures. Nothing is registered on error.
    #[instrument(skip(self, config, cancel), fields(server_id = %server_id))]
    pub async fn create_subscription(
        &self,
        server_id: &ServerId,
        config: SubscriptionConfig,
        cancel: &CancellationToken,
    ) -> Result<SubscriptionId, SubscriptionError> {
        if &config.server_id != server_id {
            return Err(SubscriptionError::ServerMismatch {
                requested: server_id.clone(),
                configured: config.server_id,
            });
        }
        if !self.connections.has_server(server_id) {
            return Err(SubscriptionError::UnknownServer {
                server_id: server_id.clone(),
            });
        }

        let items = self.prepare_items(&config)?;
        let client = self.connections.active_client(server_id)?;
        if !client.capabilities().subscriptions {
            return Err(SubscriptionError::Unsupported {
                server_id: server_id.clone(),
            });
        }

        let id = self.allocate_id();
        self.registry.insert(SubscriptionEntry::new(id, config, items));

        match self.register(id, server_id, &client, cancel).await {
            Ok(()) => {
                info!(subscription_id = %id, "Created subscription");
                Ok(id)
            }
            Err(e) => {
                self.registry.remove(id);
                Err(e)
            }
        }
    }

    /// Removes a subscription, deleting it on the server when connected.
    ///
    /// Server-side deletion failures are logged; the subscription is removed
    /// locally regardless.
    #[instrument(skip(self, cancel), fields(subscription_id = %id))]
    pub async fn remove_subscription(&self, id: SubscriptionId, cancel: &CancellationToken) -> Result<(), SubscriptionError> {
        let entry = self
            .registry
            .remove(id)
            .ok_or(SubscriptionError::NotFound { id })?;

        if let Some(protocol_id) = entry.protocol_id {
            match self.connections.active_client(&entry.server_id) {
                Ok(client) => {
                    let result = self
                        .call(&entry.server_id, cancel, client.delete_subscription(protocol_id))
                        .await;
                    match result {
                        Ok(()) => {}
                        Err(SubscriptionError::Cancelled) => return Err(SubscriptionError::Cancelled),
                        Err(e) => warn!(
                            server_id = %entry.server_id,
                            error = %e,
                            "Failed to delete subscription on server"
                        ),
                    }
                }
                Err(_) => debug!(server_id = %entry.server_id, "Server not connected, removing locally"),
            }
        }

        info!(server_id = %entry.server_id, "Removed subscription");
        Ok(())
    }

    /// Registers the configured subscriptions.
    ///
    /// Subscriptions of servers that are not connected yet stay pending and
    /// are registered by [`restore_server`](Self::restore_server) once the
    /// server connects. Results follow the order of `configs`.
    pub async fn create_configured(
        &self,
        configs: &[SubscriptionConfig],
        cancel: &CancellationToken,
    ) -> Vec<Result<SubscriptionId, SubscriptionError>> {
        let mut results = Vec::with_capacity(configs.len());
        let mut servers = BTreeSet::new();

        for config in configs {
            let result = if !self.connections.has_server(&config.server_id) {
                Err(SubscriptionError::UnknownServer {
                    server_id: config.server_id.clone(),
                })
            } else {
                self.prepare_items(config).map(|items| {
                    let id = self.allocate_id();
                    self.registry
                        .insert(SubscriptionEntry::new(id, config.clone(), items));
                    servers.insert(config.server_id.clone());
                    id
                })
            };
            if let Err(e) = &result {
                warn!(server_id = %config.server_id, error = %e, "Skipping configured subscription");
            }
            results.push(result);
        }

        for server_id in servers {
            if let Ok(client) = self.connections.active_client(&server_id) {
                let pending: Vec<_> = self
                    .registry
                    .ids_for_server(&server_id)
                    .into_iter()
                    .filter(|id| self.registry.protocol_id(*id).is_none())
                    .collect();
                self.register_all(&server_id, &client, pending, cancel).await;
            }
        }
        results
    }

    /// Re-registers every subscription of `server_id` on its current session.
    ///
    /// Returns the number of subscriptions registered.
    pub async fn restore_server(&self, server_id: &ServerId, cancel: &CancellationToken) -> usize {
        let ids = self.registry.ids_for_server(server_id);
        if ids.is_empty() {
            return 0;
        }
        let client = match self.connections.active_client(server_id) {
            Ok(client) => client,
            Err(e) => {
                debug!(server_id = %server_id, error = %e, "Cannot restore subscriptions yet");
                return 0;
            }
        };

        self.registry.unbind_server(server_id);
        let restored = self.register_all(server_id, &client, ids, cancel).await;
        info!(server_id = %server_id, restored, "Restored subscriptions");
        restored
    }

    async fn register_all(
        &self,
        server_id: &ServerId,
        client: &Arc<dyn ProtocolClient>,
        ids: Vec<SubscriptionId>,
        cancel: &CancellationToken,
    ) -> usize {
        if !client.capabilities().subscriptions {
            for id in ids {
                self.registry
                    .set_error(id, "server does not support subscriptions".to_string());
            }
            return 0;
        }

        let mut registered = 0;
        for id in ids {
            match self.register(id, server_id, client, cancel).await {
                Ok(()) => registered += 1,
                Err(SubscriptionError::Cancelled) => break,
                Err(e) => {
                    warn!(server_id = %server_id, subscription_id = %id, error = %e, "Failed to register subscription");
                    self.registry.set_error(id, e.to_string());
                }
            }
        }
        registered
    }

    /// Creates the protocol subscription and its monitored items for `id`.
    async fn register(
        &self,
        id: SubscriptionId,
        server_id: &ServerId,
        client: &Arc<dyn ProtocolClient>,
        cancel: &CancellationToken,
    ) -> Result<(), SubscriptionError> {
        let (params, requests) = self
            .registry
            .registration(id)
            .ok_or(SubscriptionError::NotFound { id })?;

        let protocol_id = self
            .call(server_id, cancel, client.create_subscription(&params))
            .await?;
        self.registry.bind(id, protocol_id);

        let results = match self
            .call(server_id, cancel, client.add_monitored_items(protocol_id, &requests))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                self.registry.release(id);
                if let Err(delete) = client.delete_subscription(protocol_id).await {
                    debug!(server_id = %server_id, error = %delete, "Cleanup of protocol subscription failed");
                }
                return Err(e);
            }
        };
        self.registry.bind_items(id, &results);

        debug!(
            server_id = %server_id,
            subscription_id = %id,
            protocol_id,
            items = requests.len(),
            "Registered subscription"
        );
        Ok(())
    }

    async fn call<T>(
        &self,
        server_id: &ServerId,
        cancel: &CancellationToken,
        operation: impl Future<Output = ClientResult<T>>,
    ) -> Result<T, SubscriptionError> {
        self.connections
            .policies()
            .server_communication
            .execute_once(server_id.as_str(), cancel, operation)
            .await
            .map_err(|e| match e {
                ClientError::Cancelled => SubscriptionError::Cancelled,
                e => SubscriptionError::Client(e),
            })
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Resolves tags and builds filters and queues for every item.
    fn prepare_items(&self, config: &SubscriptionConfig) -> Result<Vec<MonitoredItem>, SubscriptionError> {
        config
            .items
            .iter()
            .map(|item| {
                let tag = self
                    .tags
                    .get(&item.tag_id)
                    .ok_or_else(|| SubscriptionError::UnknownTag {
                        tag_id: item.tag_id.clone(),
                    })?;
                if tag.server_id != config.server_id {
                    return Err(SubscriptionError::TagServerMismatch {
                        tag_id: tag.id.clone(),
                        server_id: tag.server_id.clone(),
                    });
                }

                let filter = DeadbandFilter::new(item.deadband(), tag.eu_range)?;
                let queue_size = if item.queue_size <= 1 {
                    self.defaults.server_queue_size
                } else {
                    item.queue_size
                };

                Ok(MonitoredItem {
                    tag: tag.clone(),
                    client_handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
                    sampling_interval: item.sampling_interval,
                    queue_size,
                    discard_oldest: item.discard_oldest,
                    monitored_id: None,
                    error: None,
                    filter,
                    queue: ItemQueue::new(queue_size as usize, item.discard_oldest),
                })
            })
            .collect()
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Status of a single subscription.
    pub fn status(&self, id: SubscriptionId) -> Option<SubscriptionStatus> {
        let server_id = self.registry.server_of(id)?;
        if let Some(connection) = self.connections.get(&server_id) {
            self.registry.refresh_server(&server_id, connection.status());
        }
        self.registry.status(id)
    }

    /// Recomputes and reports the status of every subscription.
    ///
    /// Servers without subscriptions report a single `NoConfig` entry.
    pub fn statuses(&self) -> Vec<SubscriptionStatusReport> {
        let mut reports = Vec::new();
        for server_id in self.connections.server_ids() {
            let connection_status = self
                .connections
                .get(&server_id)
                .map(|c| c.status())
                .unwrap_or_default();
            self.registry.refresh_server(&server_id, connection_status);

            let server_reports = self.registry.reports_for_server(&server_id);
            if server_reports.is_empty() {
                reports.push(SubscriptionStatusReport {
                    server_id,
                    subscription_id: None,
                    status: SubscriptionStatus::NoConfig,
                    monitored_items: 0,
                    last_activity: None,
                    error: None,
                });
            } else {
                reports.extend(server_reports);
            }
        }
        reports
    }
}

#[async_trait]
impl ClientEventHandler for SubscriptionManager {
    async fn handle_events(&self, server_id: &ServerId, events: Vec<ClientEvent>) {
        let outcome = self.registry.apply_events(server_id, events);
        if outcome.connection_lost {
            info!(server_id = %server_id, "Session lost, subscriptions suspended");
        }
        if outcome.dropped > 0 {
            self.dropped.fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        }

        for (point, policy) in outcome.data_points {
            let record = OutboundRecord::data_point(&self.client_id, point);
            if let Err(e) = self.buffer.push_timeout(record, policy, self.producer_wait).await {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(server_id = %server_id, error = %e, "Data point not buffered");
            }
        }

        for alarm in outcome.alarms {
            let record = OutboundRecord::alarm(&self.client_id, alarm);
            if let Err(e) = self
                .buffer
                .push_timeout(record, self.alarm_policy, self.producer_wait)
                .await
            {
                warn!(server_id = %server_id, error = %e, "Alarm event not buffered");
            }
        }
    }

    async fn on_connected(&self, server_id: &ServerId, cancel: &CancellationToken) {
        self.restore_server(server_id, cancel).await;
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("client_id", &self.client_id)
            .field("subscriptions", &self.registry.len())
            .finish()
    }
}
