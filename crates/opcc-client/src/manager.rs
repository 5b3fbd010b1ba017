// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection management for all configured servers.
//!
//! # Components
//!
//! - [`ConnectionManager`]: owns every [`ServerConnection`], connects them in
//!   parallel under the connection policy and runs one event pump per
//!   connection
//! - [`ClientEventHandler`]: receives each connection's events in order
//! - [`InitializationReport`] / [`DisconnectReport`]: per-server outcomes
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(factory, policies, Arc::new(TracingStatusSink));
//! manager.set_event_handler(subscriptions.clone());
//!
//! let report = manager.initialize_connections(&config.servers, &cancel).await;
//! for (server_id, error) in &report.failed {
//!     tracing::warn!(server_id = %server_id, error = %error, "Server unavailable");
//! }
//!
//! let client = manager.active_client(&server_id)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use opcc_config::ServerConnectionConfig;
use opcc_core::client::{ClientEvent, ProtocolClient};
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::resilience::ResiliencePolicies;
use opcc_core::status::ConnectionStatus;
use opcc_core::types::ServerId;
use opcc_protocol::ClientFactory;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionSnapshot, ServerConnection, StatusSink};

/// Maximum events handed to the handler in one call.
pub const MAX_EVENT_BATCH: usize = 256;

// =============================================================================
// Event handling
// =============================================================================

/// Receives protocol client events.
///
/// Calls for one connection never overlap and preserve arrival order.
/// Different connections are handled concurrently.
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    /// Handles a batch of events that arrived together.
    async fn handle_events(&self, server_id: &ServerId, events: Vec<ClientEvent>);

    /// Called after a connection reaches `Connected`.
    async fn on_connected(&self, _server_id: &ServerId, _cancel: &CancellationToken) {}
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of [`ConnectionManager::initialize_connections`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializationReport {
    /// Servers that connected.
    pub connected: Vec<ServerId>,
    /// Servers that failed, with the last error.
    pub failed: Vec<(ServerId, String)>,
    /// Servers registered but not connected because they are disabled.
    pub disabled: Vec<ServerId>,
}

impl InitializationReport {
    /// Returns `true` if every enabled server connected.
    pub fn all_connected(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of servers covered by the report.
    pub fn total(&self) -> usize {
        self.connected.len() + self.failed.len() + self.disabled.len()
    }
}

/// Outcome of [`ConnectionManager::disconnect_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisconnectReport {
    /// Servers disconnected cleanly.
    pub disconnected: Vec<ServerId>,
    /// Servers whose disconnect failed.
    pub failed: Vec<(ServerId, String)>,
    /// Servers still disconnecting when the grace period ended.
    pub timed_out: Vec<ServerId>,
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Owns the connections to all configured servers.
pub struct ConnectionManager {
    factory: ClientFactory,
    policies: ResiliencePolicies,
    status_sink: Arc<dyn StatusSink>,
    connections: DashMap<ServerId, Arc<ServerConnection>>,
    handler: RwLock<Option<Weak<dyn ClientEventHandler>>>,
    pumps: Mutex<HashMap<ServerId, (CancellationToken, JoinHandle<()>)>>,
    shutdown: Mutex<CancellationToken>,
}

impl ConnectionManager {
    /// Creates an empty manager.
    pub fn new(factory: ClientFactory, policies: ResiliencePolicies, status_sink: Arc<dyn StatusSink>) -> Self {
        Self {
            factory,
            policies,
            status_sink,
            connections: DashMap::new(),
            handler: RwLock::new(None),
            pumps: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Sets the receiver of client events.
    ///
    /// The manager keeps a weak reference; event pumps started afterwards
    /// deliver to it for as long as it is alive.
    pub fn set_event_handler(&self, handler: Arc<dyn ClientEventHandler>) {
        *self.handler.write() = Some(Arc::downgrade(&handler));
    }

    fn event_handler(&self) -> Option<Arc<dyn ClientEventHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    /// The shared resilience policies.
    pub fn policies(&self) -> &ResiliencePolicies {
        &self.policies
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns the connection for `server_id`.
    pub fn get(&self, server_id: &ServerId) -> Option<Arc<ServerConnection>> {
        self.connections.get(server_id).map(|c| c.value().clone())
    }

    /// Returns `true` if `server_id` is registered.
    pub fn has_server(&self, server_id: &ServerId) -> bool {
        self.connections.contains_key(server_id)
    }

    /// Registered server ids, sorted.
    pub fn server_ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<_> = self.connections.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered servers.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no server is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connected servers.
    pub fn connected_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.status().is_connected())
            .count()
    }

    /// Snapshots of all connections, sorted by server id.
    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshots: Vec<_> = self.connections.iter().map(|c| c.snapshot()).collect();
        snapshots.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        snapshots
    }

    /// The client of a connected server.
    ///
    /// # Errors
    ///
    /// [`ClientError::Configuration`] for unknown servers,
    /// [`ClientError::NotConnected`] when the server is not connected.
    pub fn active_client(&self, server_id: &ServerId) -> ClientResult<Arc<dyn ProtocolClient>> {
        let connection = self
            .get(server_id)
            .ok_or_else(|| ClientError::configuration(format!("unknown server '{}'", server_id)))?;
        connection.active_client().ok_or(ClientError::NotConnected)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Registers and connects the configured servers.
    ///
    /// Configuration errors fail the affected server immediately. Enabled
    /// servers connect in parallel through the connection policy; one
    /// failure never cancels the others.
    pub async fn initialize_connections(
        &self,
        configs: &[ServerConnectionConfig],
        cancel: &CancellationToken,
    ) -> InitializationReport {
        let mut report = InitializationReport::default();
        let mut pending = Vec::new();

        for config in configs {
            if self.connections.contains_key(&config.id) {
                warn!(server_id = %config.id, "Server already registered, skipping");
                continue;
            }

            match self.factory.create(config) {
                Ok(client) => {
                    let connection = Arc::new(ServerConnection::new(
                        config.clone(),
                        client,
                        self.status_sink.clone(),
                    ));
                    self.connections.insert(config.id.clone(), connection.clone());
                    info!(
                        server_id = %config.id,
                        endpoint = %config.endpoint,
                        protocol = %config.protocol,
                        "Added server to manager"
                    );
                    if config.enabled {
                        pending.push(connection);
                    } else {
                        report.disabled.push(config.id.clone());
                    }
                }
                Err(e) => {
                    warn!(server_id = %config.id, error = %e, "Invalid server configuration");
                    let connection = ServerConnection::failed(config.clone(), &e, self.status_sink.clone());
                    self.connections.insert(config.id.clone(), Arc::new(connection));
                    report.failed.push((config.id.clone(), e.to_string()));
                }
            }
        }

        let results = join_all(
            pending
                .iter()
                .map(|connection| self.bring_up(connection.clone(), cancel)),
        )
        .await;

        for (connection, result) in pending.iter().zip(results) {
            match result {
                Ok(()) => report.connected.push(connection.server_id().clone()),
                Err(e) => report.failed.push((connection.server_id().clone(), e.to_string())),
            }
        }

        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            disabled = report.disabled.len(),
            "Connection initialization finished"
        );
        report
    }

    /// Connects through the connection policy, then starts the event pump.
    async fn bring_up(&self, connection: Arc<ServerConnection>, cancel: &CancellationToken) -> ClientResult<()> {
        let shutdown = self.shutdown.lock().clone();
        let server_id = connection.server_id().clone();

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ClientError::Cancelled),
            result = self.policies.connection.execute(server_id.as_str(), cancel, || {
                let connection = connection.clone();
                let cancel = cancel.clone();
                async move { connection.connect(&cancel).await.into_result() }
            }) => result,
        };

        match &result {
            Ok(()) => {
                self.ensure_pump(&connection, &shutdown);
                if let Some(handler) = self.event_handler() {
                    handler.on_connected(&server_id, cancel).await;
                }
            }
            Err(e) => warn!(server_id = %server_id, error = %e, "Failed to connect server"),
        }
        result
    }

    /// Starts an event pump if the current client has an untaken stream.
    ///
    /// A pump it replaces is stopped after the batch it is handling.
    fn ensure_pump(&self, connection: &Arc<ServerConnection>, shutdown: &CancellationToken) {
        let Some(events) = connection.client().and_then(|c| c.take_events()) else {
            return;
        };
        let stop = shutdown.child_token();
        let handle = tokio::spawn(pump(
            connection.clone(),
            events,
            self.handler.read().clone(),
            stop.clone(),
        ));
        if let Some((previous, _)) = self
            .pumps
            .lock()
            .insert(connection.server_id().clone(), (stop, handle))
        {
            previous.cancel();
        }
        debug!(server_id = %connection.server_id(), "Event pump started");
    }

    /// Disconnects and reconnects one server through the connection policy.
    pub async fn reconnect(&self, server_id: &ServerId, cancel: &CancellationToken) -> ClientResult<()> {
        let connection = self
            .get(server_id)
            .ok_or_else(|| ClientError::configuration(format!("unknown server '{}'", server_id)))?;

        if let Err(e) = connection.disconnect(cancel).await.into_result() {
            debug!(server_id = %server_id, error = %e, "Disconnect before reconnect failed");
        }
        info!(server_id = %server_id, "Reconnecting server");
        self.bring_up(connection, cancel).await
    }

    /// Makes one connect attempt for every enabled server in `Error`.
    ///
    /// Attempts go through the connection breaker without retries.
    pub async fn reconnect_failed(&self, cancel: &CancellationToken) -> Vec<(ServerId, ClientResult<()>)> {
        let failed: Vec<_> = self
            .connections
            .iter()
            .filter(|c| c.status() == ConnectionStatus::Error && c.config().enabled)
            .map(|c| c.value().clone())
            .collect();

        let shutdown = self.shutdown.lock().clone();
        let attempts = failed.into_iter().map(|connection| {
            let shutdown = shutdown.clone();
            async move {
                let server_id = connection.server_id().clone();
                let result = self
                    .policies
                    .connection
                    .execute_once(server_id.as_str(), cancel, async {
                        connection.connect(cancel).await.into_result()
                    })
                    .await;
                if result.is_ok() {
                    info!(server_id = %server_id, "Recovered server connection");
                    self.ensure_pump(&connection, &shutdown);
                    if let Some(handler) = self.event_handler() {
                        handler.on_connected(&server_id, cancel).await;
                    }
                }
                (server_id, result)
            }
        });
        join_all(attempts).await
    }

    /// Replaces a server's configuration.
    ///
    /// The new client is staged on the connection and used at its next
    /// connect. The live session is only replaced when `force_reconnect` is
    /// set. Unknown servers are added.
    ///
    /// # Errors
    ///
    /// Configuration errors from the factory; nothing is staged then.
    pub async fn update_server_configuration(
        &self,
        config: ServerConnectionConfig,
        force_reconnect: bool,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let client = self.factory.create(&config)?;
        let server_id = config.id.clone();

        match self.get(&server_id) {
            Some(connection) => connection.update_configuration(config, client),
            None => {
                let connection = ServerConnection::new(config, client, self.status_sink.clone());
                self.connections.insert(server_id.clone(), Arc::new(connection));
                info!(server_id = %server_id, "Added server to manager");
            }
        }

        if force_reconnect {
            self.reconnect(&server_id, cancel).await?;
        }
        Ok(())
    }

    /// Disconnects every server in parallel.
    ///
    /// Event pumps and in-flight connects are cancelled first. Pumps finish
    /// the batch they are handling. Disconnects still running after `grace`
    /// are cancelled and reported as timed out; pumps still running then
    /// are aborted.
    pub async fn disconnect_all(&self, grace: Duration) -> DisconnectReport {
        let deadline = tokio::time::Instant::now() + grace;
        let previous = std::mem::replace(&mut *self.shutdown.lock(), CancellationToken::new());
        previous.cancel();
        let pumps: Vec<_> = self
            .pumps
            .lock()
            .drain()
            .map(|(_, (stop, handle))| {
                stop.cancel();
                handle
            })
            .collect();

        let connections: Vec<_> = self.connections.iter().map(|c| c.value().clone()).collect();
        let cancel = CancellationToken::new();
        let all = join_all(connections.iter().map(|connection| {
            let cancel = cancel.clone();
            async move {
                let transition = connection.disconnect(&cancel).await;
                (connection.server_id().clone(), transition.result)
            }
        }));
        tokio::pin!(all);

        let results = tokio::select! {
            results = &mut all => results,
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                all.await
            }
        };

        let aborts: Vec<_> = pumps.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout_at(deadline, join_all(pumps)).await.is_err() {
            warn!(pumps = aborts.len(), "Event pumps still busy after grace period, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        let mut report = DisconnectReport::default();
        for (server_id, result) in results {
            match result {
                Ok(()) => report.disconnected.push(server_id),
                Err(ClientError::Cancelled) => {
                    warn!(server_id = %server_id, grace_ms = grace.as_millis() as u64, "Disconnect exceeded grace period");
                    report.timed_out.push(server_id);
                }
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "Disconnect failed");
                    report.failed.push((server_id, e.to_string()));
                }
            }
        }

        info!(
            disconnected = report.disconnected.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "All servers disconnected"
        );
        report
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("servers", &self.connections.len())
            .field("factory", &self.factory)
            .finish()
    }
}

/// Forwards one connection's events to the handler, in order.
async fn pump(
    connection: Arc<ServerConnection>,
    mut events: mpsc::Receiver<ClientEvent>,
    handler: Option<Weak<dyn ClientEventHandler>>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut batch = vec![first];
        while batch.len() < MAX_EVENT_BATCH {
            match events.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        for event in &batch {
            if let ClientEvent::ConnectionLost { reason } = event {
                connection.mark_lost(reason);
            }
        }

        if let Some(handler) = handler.as_ref().and_then(Weak::upgrade) {
            handler.handle_events(connection.server_id(), batch).await;
        }
    }
    debug!(server_id = %connection.server_id(), "Event pump stopped");
}
