// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server connection lifecycle.
//!
//! A [`ServerConnection`] owns one protocol client and drives it through
//! the connection state machine:
//!
//! ```text
//!  Disconnected ──▶ Connecting ──▶ Connected ──▶ Disconnecting ──▶ Disconnected
//!                        │              │
//!                        ▼              ▼
//!                      Error ──▶ Reconnecting ──▶ Connected | Error
//! ```
//!
//! Every transition is reported to the injected [`StatusSink`] and returned
//! to the caller inside a [`Transition`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opcc_config::ServerConnectionConfig;
use opcc_core::client::ProtocolClient;
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::status::ConnectionStatus;
use opcc_core::types::{ProtocolKind, ServerId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Status reporting
// =============================================================================

/// One connection state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Server whose connection changed.
    pub server_id: ServerId,
    /// Previous state.
    pub from: ConnectionStatus,
    /// New state.
    pub to: ConnectionStatus,
    /// Error that caused the change, if any.
    pub error: Option<String>,
    /// Time of the change.
    pub timestamp: DateTime<Utc>,
}

/// Receives connection state changes.
pub trait StatusSink: Send + Sync {
    /// Called after every transition, outside any connection lock.
    fn on_status_change(&self, change: &StatusChange);
}

/// Status sink that logs transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn on_status_change(&self, change: &StatusChange) {
        match &change.error {
            Some(error) => warn!(
                server_id = %change.server_id,
                from = %change.from,
                to = %change.to,
                error = %error,
                "Connection status changed"
            ),
            None => info!(
                server_id = %change.server_id,
                from = %change.from,
                to = %change.to,
                "Connection status changed"
            ),
        }
    }
}

/// Result of a connect or disconnect call.
#[derive(Debug)]
pub struct Transition {
    /// State changes made by the call, in order. Empty for a no-op.
    pub changes: Vec<StatusChange>,
    /// Outcome of the protocol operation.
    pub result: ClientResult<()>,
}

impl Transition {
    fn noop() -> Self {
        Self {
            changes: Vec::new(),
            result: Ok(()),
        }
    }

    /// Returns `true` if the call changed nothing.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.result.is_ok()
    }

    /// Returns `true` if the protocol operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Discards the changes and returns the outcome.
    pub fn into_result(self) -> ClientResult<()> {
        self.result
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    /// Server id.
    pub server_id: ServerId,
    /// Display name.
    pub name: String,
    /// Protocol, when a client exists.
    pub protocol: Option<ProtocolKind>,
    /// Endpoint URL.
    pub endpoint: String,
    /// Current state.
    pub status: ConnectionStatus,
    /// Time of the last state change.
    pub last_change: DateTime<Utc>,
    /// Last recorded error.
    pub last_error: Option<String>,
    /// Whether a configuration update waits for the next connect.
    pub update_pending: bool,
}

// =============================================================================
// ServerConnection
// =============================================================================

#[derive(Debug)]
struct State {
    status: ConnectionStatus,
    last_change: DateTime<Utc>,
    last_error: Option<String>,
}

struct Staged {
    config: ServerConnectionConfig,
    client: Arc<dyn ProtocolClient>,
}

/// A server connection and its lifecycle state.
pub struct ServerConnection {
    server_id: ServerId,
    config: RwLock<ServerConnectionConfig>,
    client: RwLock<Option<Arc<dyn ProtocolClient>>>,
    staged: Mutex<Option<Staged>>,
    state: Mutex<State>,
    op_lock: tokio::sync::Mutex<()>,
    sink: Arc<dyn StatusSink>,
}

impl ServerConnection {
    /// Creates a disconnected connection owning `client`.
    pub fn new(
        config: ServerConnectionConfig,
        client: Arc<dyn ProtocolClient>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self::build(config, Some(client), None, sink)
    }

    /// Creates a connection whose configuration could not produce a client.
    ///
    /// It starts in `Error` and stays there until a valid configuration is
    /// staged with [`update_configuration`](Self::update_configuration).
    pub fn failed(config: ServerConnectionConfig, error: &ClientError, sink: Arc<dyn StatusSink>) -> Self {
        Self::build(config, None, Some(error.to_string()), sink)
    }

    fn build(
        config: ServerConnectionConfig,
        client: Option<Arc<dyn ProtocolClient>>,
        error: Option<String>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let status = if error.is_some() {
            ConnectionStatus::Error
        } else {
            ConnectionStatus::Disconnected
        };
        Self {
            server_id: config.id.clone(),
            config: RwLock::new(config),
            client: RwLock::new(client),
            staged: Mutex::new(None),
            state: Mutex::new(State {
                status,
                last_change: Utc::now(),
                last_error: error,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            sink,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Server id.
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Active configuration.
    pub fn config(&self) -> ServerConnectionConfig {
        self.config.read().clone()
    }

    /// Protocol of the current client.
    pub fn protocol(&self) -> Option<ProtocolKind> {
        self.client.read().as_ref().map(|c| c.protocol())
    }

    /// Current state.
    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    /// Time of the last state change.
    pub fn last_change(&self) -> DateTime<Utc> {
        self.state.lock().last_change
    }

    /// Last recorded error.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// The current client, in any state.
    pub fn client(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.client.read().clone()
    }

    /// The client, if the connection is up.
    pub fn active_client(&self) -> Option<Arc<dyn ProtocolClient>> {
        if !self.status().is_connected() {
            return None;
        }
        self.client().filter(|c| c.is_connected())
    }

    /// Returns `true` if a configuration update is staged.
    pub fn has_pending_update(&self) -> bool {
        self.staged.lock().is_some()
    }

    /// Point-in-time view.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let protocol = self.protocol();
        let update_pending = self.has_pending_update();
        let config = self.config.read();
        let state = self.state.lock();
        ConnectionSnapshot {
            server_id: self.server_id.clone(),
            name: config.display_name().to_string(),
            protocol,
            endpoint: config.endpoint.clone(),
            status: state.status,
            last_change: state.last_change,
            last_error: state.last_error.clone(),
            update_pending,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the session.
    ///
    /// No-op while `Connected`, `Connecting` or `Reconnecting`. From `Error`
    /// the attempt runs as `Reconnecting`. A staged configuration is swapped
    /// in first.
    pub async fn connect(&self, cancel: &CancellationToken) -> Transition {
        if Self::connect_is_noop(self.status()) {
            return Transition::noop();
        }
        let _op = self.op_lock.lock().await;

        let from = self.status();
        if Self::connect_is_noop(from) {
            return Transition::noop();
        }

        self.apply_staged();
        let Some(client) = self.client() else {
            let message = self
                .last_error()
                .unwrap_or_else(|| "no protocol client configured".to_string());
            return Transition {
                changes: Vec::new(),
                result: Err(ClientError::configuration(message)),
            };
        };

        let attempt = if from == ConnectionStatus::Error {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        };
        let mut changes = vec![self.transition(attempt, None)];

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = client.connect() => result,
        };

        match &result {
            Ok(()) => changes.push(self.transition(ConnectionStatus::Connected, None)),
            Err(ClientError::Cancelled) => changes.push(
                self.transition(ConnectionStatus::Error, Some("connect cancelled".to_string())),
            ),
            Err(e) => changes.push(self.transition(ConnectionStatus::Error, Some(e.to_string()))),
        }

        Transition { changes, result }
    }

    fn connect_is_noop(status: ConnectionStatus) -> bool {
        matches!(
            status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting | ConnectionStatus::Reconnecting
        )
    }

    /// Closes the session. No-op while `Disconnected` or `Disconnecting`.
    pub async fn disconnect(&self, cancel: &CancellationToken) -> Transition {
        if Self::disconnect_is_noop(self.status()) {
            return Transition::noop();
        }
        let _op = self.op_lock.lock().await;
        if Self::disconnect_is_noop(self.status()) {
            return Transition::noop();
        }

        let mut changes = vec![self.transition(ConnectionStatus::Disconnecting, None)];
        let result = match self.client() {
            Some(client) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ClientError::Cancelled),
                result = client.disconnect() => result,
            },
            None => Ok(()),
        };

        match &result {
            Ok(()) => changes.push(self.transition(ConnectionStatus::Disconnected, None)),
            Err(ClientError::Cancelled) => changes.push(
                self.transition(ConnectionStatus::Error, Some("disconnect cancelled".to_string())),
            ),
            Err(e) => changes.push(self.transition(ConnectionStatus::Error, Some(e.to_string()))),
        }

        Transition { changes, result }
    }

    fn disconnect_is_noop(status: ConnectionStatus) -> bool {
        matches!(
            status,
            ConnectionStatus::Disconnected | ConnectionStatus::Disconnecting
        )
    }

    /// Records a session lost outside a connect or disconnect call.
    ///
    /// Only a `Connected` connection moves to `Error`.
    pub fn mark_lost(&self, reason: &str) -> Option<StatusChange> {
        self.transition_from(
            ConnectionStatus::Connected,
            ConnectionStatus::Error,
            Some(reason.to_string()),
        )
    }

    /// Stages a new configuration and client for the next connect.
    ///
    /// The live session is left untouched.
    pub fn update_configuration(&self, config: ServerConnectionConfig, client: Arc<dyn ProtocolClient>) {
        info!(
            server_id = %self.server_id,
            endpoint = %config.endpoint,
            "Staged configuration update for next connect"
        );
        *self.staged.lock() = Some(Staged { config, client });
    }

    fn apply_staged(&self) {
        let staged = self.staged.lock().take();
        if let Some(staged) = staged {
            debug!(server_id = %self.server_id, "Applying staged configuration");
            *self.config.write() = staged.config;
            *self.client.write() = Some(staged.client);
        }
    }

    fn transition(&self, to: ConnectionStatus, error: Option<String>) -> StatusChange {
        let change = self.apply(&mut self.state.lock(), to, error);
        self.sink.on_status_change(&change);
        change
    }

    /// Transitions only if the status is still `from`, checked under the
    /// same lock that applies the change.
    fn transition_from(
        &self,
        from: ConnectionStatus,
        to: ConnectionStatus,
        error: Option<String>,
    ) -> Option<StatusChange> {
        let change = {
            let mut state = self.state.lock();
            if state.status != from {
                return None;
            }
            self.apply(&mut state, to, error)
        };
        self.sink.on_status_change(&change);
        Some(change)
    }

    fn apply(&self, state: &mut State, to: ConnectionStatus, error: Option<String>) -> StatusChange {
        let change = StatusChange {
            server_id: self.server_id.clone(),
            from: state.status,
            to,
            error: error.clone(),
            timestamp: Utc::now(),
        };
        state.status = to;
        state.last_change = change.timestamp;
        if error.is_some() {
            state.last_error = error;
        }
        change
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("server_id", &self.server_id)
            .field("status", &self.status())
            .field("protocol", &self.protocol())
            .finish()
    }
}
