// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session plumbing shared by the protocol adapters.
//!
//! [`AdapterSession`] owns the transport, the per-operation timeout and the
//! notification pump that turns transport [`Notification`]s into
//! [`ClientEvent`]s. Each adapter exposes the subset of its operations the
//! protocol variant supports.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opcc_config::ServerConnectionConfig;
use opcc_core::client::{
    event_channel, BrowseEntry, ClientEvent, HistoryQuery, HistoryValue, MonitoredItemRequest,
    MonitoredItemResult, ReadValue, SubscriptionParams, WriteItem,
};
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::types::{AlarmEvent, DeadbandType, ProtocolKind, ServerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::conversion::StatusCode;
use crate::transport::{EventNotification, Notification, SessionTransport, TransportError, TransportResult};

// =============================================================================
// SessionStats
// =============================================================================

/// Service call counters of one adapter.
#[derive(Debug, Default)]
pub struct SessionStats {
    calls: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    notifications: AtomicU64,
}

impl SessionStats {
    /// Total service calls.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Calls that returned an error.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Calls that hit the operation timeout.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Notifications forwarded to the event stream.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

// =============================================================================
// AdapterSession
// =============================================================================

/// Transport, timeout and event stream of one protocol client.
pub struct AdapterSession {
    protocol: ProtocolKind,
    config: ServerConnectionConfig,
    transport: Arc<dyn SessionTransport>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SessionStats>,
}

impl AdapterSession {
    /// Creates a closed session over `transport`.
    pub fn new(
        protocol: ProtocolKind,
        config: ServerConnectionConfig,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            protocol,
            config,
            transport,
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            pump: Mutex::new(None),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Server id.
    pub fn server_id(&self) -> &ServerId {
        &self.config.id
    }

    /// Connection config.
    pub fn config(&self) -> &ServerConnectionConfig {
        &self.config
    }

    /// Call counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Per-operation timeout.
    pub fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    /// Returns `true` while the session is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.is_open()
    }

    /// Hands out the event receiver once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events_rx.lock().take()
    }

    /// Opens the session and starts the notification pump.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let timeout = self.operation_timeout();
        match tokio::time::timeout(timeout, self.transport.open_session(&self.config)).await {
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(ClientError::timeout(timeout));
            }
            Ok(Err(e)) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Err(connect_error(&e));
            }
            Ok(Ok(())) => {}
        }

        if let Some(notifications) = self.transport.take_notifications() {
            let handle = tokio::spawn(pump(
                self.config.id.clone(),
                notifications,
                self.events_tx.clone(),
                self.connected.clone(),
                self.stats.clone(),
            ));
            if let Some(previous) = self.pump.lock().replace(handle) {
                previous.abort();
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        debug!(
            server_id = %self.config.id,
            protocol = %self.protocol,
            endpoint = %self.config.endpoint,
            credentials = self.config.credentials.kind(),
            "Session opened"
        );
        Ok(())
    }

    /// Stops the pump and closes the session.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        if !self.transport.is_open() {
            return Ok(());
        }

        let timeout = self.operation_timeout();
        match tokio::time::timeout(timeout, self.transport.close_session()).await {
            Err(_) => Err(ClientError::timeout(timeout)),
            Ok(Err(e)) => Err(e.code.to_client_error(None, &e.message)),
            Ok(Ok(())) => {
                debug!(server_id = %self.config.id, "Session closed");
                Ok(())
            }
        }
    }

    /// Runs one service call bounded by the operation timeout.
    async fn call<T, F>(&self, address: Option<&str>, fut: F) -> ClientResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        let timeout = self.operation_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(ClientError::timeout(timeout))
            }
            Ok(Err(e)) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                let err = match e.code {
                    StatusCode::BAD_TIMEOUT => ClientError::timeout(timeout),
                    code => code.to_client_error(address, &e.message),
                };
                if err.is_connection_loss() {
                    self.mark_lost(&err.to_string()).await;
                }
                Err(err)
            }
            Ok(Ok(value)) => Ok(value),
        }
    }

    async fn mark_lost(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(server_id = %self.config.id, reason, "Session lost during service call");
            let _ = self
                .events_tx
                .send(ClientEvent::ConnectionLost {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Reads current values.
    pub async fn read(&self, addresses: &[String]) -> ClientResult<Vec<ReadValue>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let values = self
            .call(addresses.first().map(String::as_str), self.transport.read(addresses))
            .await?;
        if values.len() != addresses.len() {
            return Err(ClientError::protocol(format!(
                "read returned {} results for {} addresses",
                values.len(),
                addresses.len()
            )));
        }

        Ok(addresses
            .iter()
            .zip(values)
            .map(|(address, data)| ReadValue {
                address: address.clone(),
                quality: data.status.to_quality(),
                value: data.value,
                source_timestamp: data.source_timestamp,
            })
            .collect())
    }

    /// Writes values; per-item failures are returned in place.
    pub async fn write(&self, items: &[WriteItem]) -> ClientResult<Vec<ClientResult<()>>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let pairs: Vec<(String, _)> = items.iter().map(|i| (i.address.clone(), i.value.clone())).collect();
        let statuses = self.call(None, self.transport.write(&pairs)).await?;
        if statuses.len() != items.len() {
            return Err(ClientError::protocol(format!(
                "write returned {} results for {} items",
                statuses.len(),
                items.len()
            )));
        }

        Ok(items
            .iter()
            .zip(statuses)
            .map(|(item, status)| {
                if status.is_good() {
                    Ok(())
                } else {
                    Err(status.to_client_error(Some(&item.address), ""))
                }
            })
            .collect())
    }

    /// Creates a subscription.
    pub async fn create_subscription(&self, params: &SubscriptionParams) -> ClientResult<u32> {
        self.call(None, self.transport.create_subscription(params))
            .await
            .map_err(subscription_error)
    }

    /// Registers monitored items.
    ///
    /// Percent deadbands without an EU range are rejected per item before
    /// the request reaches the server.
    pub async fn add_monitored_items(
        &self,
        subscription: u32,
        items: &[MonitoredItemRequest],
    ) -> ClientResult<Vec<MonitoredItemResult>> {
        let (accepted, rejected): (Vec<_>, Vec<_>) = items
            .iter()
            .partition(|i| i.deadband.kind != DeadbandType::Percent || i.eu_range.is_some());

        let mut results: Vec<MonitoredItemResult> = rejected
            .iter()
            .map(|i| MonitoredItemResult {
                client_handle: i.client_handle,
                result: Err("percent deadband requires an EU range".to_string()),
            })
            .collect();

        if !accepted.is_empty() {
            let requests: Vec<MonitoredItemRequest> = accepted.iter().map(|i| (*i).clone()).collect();
            let created = self
                .call(None, self.transport.create_monitored_items(subscription, &requests))
                .await
                .map_err(subscription_error)?;
            results.extend(requests.iter().zip(created).map(|(req, res)| MonitoredItemResult {
                client_handle: req.client_handle,
                result: if res.status.is_good() {
                    Ok(res.monitored_item_id)
                } else {
                    Err(res.status.to_string())
                },
            }));
        }

        Ok(results)
    }

    /// Deletes a subscription.
    pub async fn delete_subscription(&self, subscription: u32) -> ClientResult<()> {
        self.call(None, self.transport.delete_subscription(subscription))
            .await
            .map_err(subscription_error)
    }

    /// Browses the address space.
    pub async fn browse(&self, parent: Option<&str>) -> ClientResult<Vec<BrowseEntry>> {
        self.call(parent, self.transport.browse(parent)).await
    }

    /// Reads raw history.
    pub async fn read_history(&self, query: &HistoryQuery) -> ClientResult<Vec<HistoryValue>> {
        if query.end <= query.start {
            return Err(ClientError::invalid_state(format!(
                "history window is empty: {} .. {}",
                query.start, query.end
            )));
        }
        let samples = self.call(None, self.transport.read_history(query)).await?;
        Ok(samples
            .into_iter()
            .map(|s| HistoryValue {
                address: s.address,
                quality: s.data.status.to_quality(),
                value: s.data.value,
                timestamp: s.timestamp,
            })
            .collect())
    }

    /// Acknowledges an event.
    pub async fn acknowledge(&self, event_id: &str, comment: &str) -> ClientResult<()> {
        self.call(Some(event_id), self.transport.acknowledge(event_id, comment))
            .await
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for AdapterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSession")
            .field("server_id", &self.config.id)
            .field("protocol", &self.protocol)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn connect_error(e: &TransportError) -> ClientError {
    match e.code {
        StatusCode::BAD_USER_ACCESS_DENIED => {
            ClientError::configuration(format!("session rejected credentials: {}", e))
        }
        StatusCode::BAD_TIMEOUT => ClientError::timeout(Duration::ZERO),
        _ => ClientError::connection_failed(e.to_string()),
    }
}

fn subscription_error(err: ClientError) -> ClientError {
    match err {
        ClientError::BadStatus { message, .. } => ClientError::subscription(message),
        other => other,
    }
}

// =============================================================================
// Notification pump
// =============================================================================

fn to_alarm(server_id: &ServerId, event: EventNotification) -> AlarmEvent {
    AlarmEvent {
        server_id: server_id.clone(),
        event_id: event.event_id,
        source_id: event.source,
        message: event.message,
        severity: event.severity.clamp(1, AlarmEvent::MAX_SEVERITY),
        ack_state: event.ack_state,
        timestamp: event.time,
    }
}

async fn pump(
    server_id: ServerId,
    mut notifications: mpsc::Receiver<Notification>,
    events: mpsc::Sender<ClientEvent>,
    connected: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
) {
    let mut lost_reason = String::from("notification stream closed");

    while let Some(notification) = notifications.recv().await {
        let event = match notification {
            Notification::DataChange {
                subscription,
                client_handle,
                data,
            } => ClientEvent::DataChange {
                subscription,
                client_handle,
                quality: data.status.to_quality(),
                value: data.value,
                source_timestamp: data.source_timestamp,
            },
            Notification::KeepAlive { subscription } => ClientEvent::KeepAlive { subscription },
            Notification::Event(event) => ClientEvent::Alarm(to_alarm(&server_id, event)),
            Notification::Status(code) if code.is_bad() => {
                lost_reason = code.to_string();
                break;
            }
            Notification::Status(_) => continue,
        };

        stats.notifications.fetch_add(1, Ordering::Relaxed);
        if events.send(event).await.is_err() {
            return;
        }
    }

    if connected.swap(false, Ordering::SeqCst) {
        warn!(server_id = %server_id, reason = %lost_reason, "Session lost");
        let _ = events
            .send(ClientEvent::ConnectionLost { reason: lost_reason })
            .await;
    }
}
