// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory OPC server.
//!
//! [`SimulatedServer`] implements [`SessionTransport`] over a small address
//! space held in memory. It backs the adapter tests, the integration suites
//! and the binary's `--simulate` mode.
//!
//! # Example
//!
//! ```
//! use opcc_core::types::Value;
//! use opcc_protocol::simulated::SimulatedServer;
//!
//! let server = SimulatedServer::new("opc.tcp://localhost:4840")
//!     .with_node("ns=2;s=Temp", Value::Float64(21.5), true);
//! assert_eq!(server.value("ns=2;s=Temp"), Some(Value::Float64(21.5)));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opcc_config::{Credentials, ServerConnectionConfig};
use opcc_core::client::{BrowseEntry, HistoryQuery, MonitoredItemRequest, SubscriptionParams};
use opcc_core::types::{AckState, DataType, Value};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::conversion::StatusCode;
use crate::transport::{
    DataValue, EventNotification, HistorySample, MonitoredItemCreateResult, Notification,
    SessionTransport, TransportError, TransportResult,
};

/// Capacity of the per-session notification channel.
const NOTIFICATION_CAPACITY: usize = 1024;

// =============================================================================
// Address space
// =============================================================================

#[derive(Debug, Clone)]
struct SimNode {
    display_name: String,
    parent: Option<String>,
    is_folder: bool,
    value: Value,
    status: StatusCode,
    writable: bool,
    data_type: Option<DataType>,
}

#[derive(Debug, Default)]
struct SimSubscription {
    /// Address -> (client handle, monitored item id).
    items: HashMap<String, Vec<(u32, u32)>>,
}

#[derive(Debug, Default)]
struct SimState {
    nodes: BTreeMap<String, SimNode>,
    history: HashMap<String, Vec<(DateTime<Utc>, Value)>>,
    subscriptions: HashMap<u32, SimSubscription>,
    events: HashMap<String, AckState>,
    notify_tx: Option<mpsc::Sender<Notification>>,
    pending_rx: Option<mpsc::Receiver<Notification>>,
    writes: Vec<(String, Value)>,
    acks: Vec<(String, String)>,
    next_subscription: u32,
    next_item: u32,
}

// =============================================================================
// SimulatedServer
// =============================================================================

/// An in-memory server with failure injection and call counters.
#[derive(Debug)]
pub struct SimulatedServer {
    endpoint: String,
    state: Mutex<SimState>,
    open: AtomicBool,
    reachable: AtomicBool,
    reject_credentials: AtomicBool,
    fail_connects: AtomicU32,
    fail_reads: AtomicU32,
    response_delay: Mutex<Duration>,
    connect_calls: AtomicU64,
    read_calls: AtomicU64,
    write_calls: AtomicU64,
    ack_calls: AtomicU64,
}

impl SimulatedServer {
    /// Creates an empty, reachable server.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Mutex::new(SimState {
                next_subscription: 1,
                next_item: 1,
                ..Default::default()
            }),
            open: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            reject_credentials: AtomicBool::new(false),
            fail_connects: AtomicU32::new(0),
            fail_reads: AtomicU32::new(0),
            response_delay: Mutex::new(Duration::ZERO),
            connect_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
            write_calls: AtomicU64::new(0),
            ack_calls: AtomicU64::new(0),
        }
    }

    /// Adds a variable at the root.
    pub fn with_node(self, address: impl Into<String>, value: Value, writable: bool) -> Self {
        self.add_node(None, address, value, writable);
        self
    }

    /// Adds a folder.
    pub fn with_folder(self, parent: Option<&str>, address: impl Into<String>) -> Self {
        let address = address.into();
        self.state.lock().nodes.insert(
            address.clone(),
            SimNode {
                display_name: display_name(&address),
                parent: parent.map(str::to_string),
                is_folder: true,
                value: Value::Null,
                status: StatusCode::GOOD,
                writable: false,
                data_type: None,
            },
        );
        self
    }

    /// Adds a variable below `parent`.
    pub fn add_node(&self, parent: Option<&str>, address: impl Into<String>, value: Value, writable: bool) {
        let address = address.into();
        let data_type = data_type_of(&value);
        self.state.lock().nodes.insert(
            address.clone(),
            SimNode {
                display_name: display_name(&address),
                parent: parent.map(str::to_string),
                is_folder: false,
                value,
                status: StatusCode::GOOD,
                writable,
                data_type,
            },
        );
    }

    /// Current value of a node.
    pub fn value(&self, address: &str) -> Option<Value> {
        self.state.lock().nodes.get(address).map(|n| n.value.clone())
    }

    /// Changes a value and notifies every monitored item on it.
    ///
    /// Returns the number of notifications queued.
    pub fn set_value(&self, address: &str, value: Value) -> usize {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(address) {
            node.value = value.clone();
            node.status = StatusCode::GOOD;
        }
        state
            .history
            .entry(address.to_string())
            .or_default()
            .push((Utc::now(), value.clone()));
        notify_change(&state, address, DataValue::good(value))
    }

    /// Sets the status of a node; reads return it alongside the value.
    pub fn set_status(&self, address: &str, status: StatusCode) {
        if let Some(node) = self.state.lock().nodes.get_mut(address) {
            node.status = status;
        }
    }

    /// Appends a historical sample.
    pub fn add_history(&self, address: impl Into<String>, timestamp: DateTime<Utc>, value: Value) {
        let mut state = self.state.lock();
        let samples = state.history.entry(address.into()).or_default();
        samples.push((timestamp, value));
        samples.sort_by_key(|(t, _)| *t);
    }

    /// Raises an alarm and delivers it to the open session.
    pub fn raise_alarm(&self, event_id: impl Into<String>, source: impl Into<String>, message: impl Into<String>, severity: u16) -> bool {
        let event_id = event_id.into();
        let mut state = self.state.lock();
        state.events.insert(event_id.clone(), AckState::Unacknowledged);
        let notification = Notification::Event(EventNotification {
            event_id,
            source: source.into(),
            message: message.into(),
            severity,
            ack_state: AckState::Unacknowledged,
            time: Utc::now(),
        });
        send(&state, notification)
    }

    /// Sends a keep-alive for every subscription.
    pub fn publish_keep_alive(&self) -> usize {
        let state = self.state.lock();
        state
            .subscriptions
            .keys()
            .filter(|id| send(&state, Notification::KeepAlive { subscription: **id }))
            .count()
    }

    /// Terminates the session from the server side.
    pub fn drop_session(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(tx) = state.notify_tx.take() {
            let _ = tx.try_send(Notification::Status(StatusCode::BAD_CONNECTION_CLOSED));
        }
        state.subscriptions.clear();
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Makes the endpoint (un)reachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fails the next `n` session opens with a communication error.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fails the next `n` reads with a communication error.
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Rejects every identity with `BadUserAccessDenied`.
    pub fn set_reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Delays every service response.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock() = delay;
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Session open attempts.
    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Read service calls.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Write service calls.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Acknowledge service calls.
    pub fn ack_calls(&self) -> u64 {
        self.ack_calls.load(Ordering::SeqCst)
    }

    /// Accepted writes in arrival order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.state.lock().writes.clone()
    }

    /// Accepted acknowledgements (event id, comment).
    pub fn acknowledgements(&self) -> Vec<(String, String)> {
        self.state.lock().acks.clone()
    }

    /// Acknowledgement state of an event.
    pub fn event_state(&self, event_id: &str) -> Option<AckState> {
        self.state.lock().events.get(event_id).copied()
    }

    /// Live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Live monitored items across all subscriptions.
    pub fn monitored_item_count(&self) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .flat_map(|s| s.items.values())
            .map(Vec::len)
            .sum()
    }

    async fn respond(&self) -> TransportResult<()> {
        let delay = *self.response_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StatusCode::BAD_SESSION_CLOSED.into())
        }
    }
}

fn display_name(address: &str) -> String {
    let tail = address.rsplit(['=', '.', '/']).next().unwrap_or(address);
    if tail.is_empty() {
        address.to_string()
    } else {
        tail.to_string()
    }
}

fn data_type_of(value: &Value) -> Option<DataType> {
    let data_type = match value {
        Value::Bool(_) => DataType::Bool,
        Value::Int16(_) => DataType::Int16,
        Value::Int32(_) => DataType::Int32,
        Value::Int64(_) => DataType::Int64,
        Value::UInt16(_) => DataType::UInt16,
        Value::UInt32(_) => DataType::UInt32,
        Value::UInt64(_) => DataType::UInt64,
        Value::Float32(_) => DataType::Float32,
        Value::Float64(_) => DataType::Float64,
        Value::String(_) => DataType::String,
        _ => return None,
    };
    Some(data_type)
}

fn send(state: &SimState, notification: Notification) -> bool {
    match &state.notify_tx {
        Some(tx) => tx.try_send(notification).is_ok(),
        None => false,
    }
}

fn notify_change(state: &SimState, address: &str, data: DataValue) -> usize {
    let mut sent = 0;
    for (subscription, sub) in &state.subscriptions {
        for (client_handle, _) in sub.items.get(address).into_iter().flatten() {
            let queued = send(
                state,
                Notification::DataChange {
                    subscription: *subscription,
                    client_handle: *client_handle,
                    data: data.clone(),
                },
            );
            if queued {
                sent += 1;
            }
        }
    }
    sent
}

#[async_trait]
impl SessionTransport for SimulatedServer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open_session(&self, config: &ServerConnectionConfig) -> TransportResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.response_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                StatusCode::BAD_COMMUNICATION_ERROR,
                format!("{} is unreachable", self.endpoint),
            ));
        }
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::new(
                StatusCode::BAD_COMMUNICATION_ERROR,
                "injected connect failure",
            ));
        }
        if self.reject_credentials.load(Ordering::SeqCst)
            && !matches!(config.credentials, Credentials::Anonymous)
        {
            return Err(StatusCode::BAD_USER_ACCESS_DENIED.into());
        }

        let (tx, rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let mut state = self.state.lock();
        state.notify_tx = Some(tx);
        state.pending_rx = Some(rx);
        state.subscriptions.clear();
        self.open.store(true, Ordering::SeqCst);
        trace!(endpoint = %self.endpoint, "Simulated session opened");
        Ok(())
    }

    async fn close_session(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.notify_tx = None;
        state.pending_rx = None;
        state.subscriptions.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.state.lock().pending_rx.take()
    }

    async fn read(&self, addresses: &[String]) -> TransportResult<Vec<DataValue>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;

        let remaining = self.fail_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::new(
                StatusCode::BAD_COMMUNICATION_ERROR,
                "injected read failure",
            ));
        }

        let state = self.state.lock();
        Ok(addresses
            .iter()
            .map(|address| match state.nodes.get(address) {
                Some(node) if !node.is_folder => DataValue {
                    value: node.value.clone(),
                    status: node.status,
                    source_timestamp: Some(Utc::now()),
                },
                _ => DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN),
            })
            .collect())
    }

    async fn write(&self, items: &[(String, Value)]) -> TransportResult<Vec<StatusCode>> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;

        let mut state = self.state.lock();
        let mut statuses = Vec::with_capacity(items.len());
        for (address, value) in items {
            let status = match state.nodes.get_mut(address) {
                None => StatusCode::BAD_NODE_ID_UNKNOWN,
                Some(node) if node.is_folder || !node.writable => StatusCode::BAD_NOT_WRITABLE,
                Some(node) if node.data_type.is_some_and(|t| !t.accepts(value)) => {
                    StatusCode::BAD_TYPE_MISMATCH
                }
                Some(node) => {
                    node.value = value.clone();
                    node.status = StatusCode::GOOD;
                    StatusCode::GOOD
                }
            };
            if status.is_good() {
                state.writes.push((address.clone(), value.clone()));
                notify_change(&state, address, DataValue::good(value.clone()));
            }
            statuses.push(status);
        }
        Ok(statuses)
    }

    async fn create_subscription(&self, _params: &SubscriptionParams) -> TransportResult<u32> {
        self.respond().await?;
        let mut state = self.state.lock();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.subscriptions.insert(id, SimSubscription::default());
        Ok(id)
    }

    async fn create_monitored_items(
        &self,
        subscription: u32,
        items: &[MonitoredItemRequest],
    ) -> TransportResult<Vec<MonitoredItemCreateResult>> {
        self.respond().await?;
        let mut state = self.state.lock();
        if !state.subscriptions.contains_key(&subscription) {
            return Err(TransportError::new(
                StatusCode::BAD,
                format!("subscription {} does not exist", subscription),
            ));
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let known = state
                .nodes
                .get(&item.address)
                .is_some_and(|n| !n.is_folder);
            if !known {
                results.push(MonitoredItemCreateResult {
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                    monitored_item_id: 0,
                });
                continue;
            }

            let id = state.next_item;
            state.next_item += 1;
            if let Some(sub) = state.subscriptions.get_mut(&subscription) {
                sub.items
                    .entry(item.address.clone())
                    .or_default()
                    .push((item.client_handle, id));
            }
            results.push(MonitoredItemCreateResult {
                status: StatusCode::GOOD,
                monitored_item_id: id,
            });
        }
        Ok(results)
    }

    async fn delete_subscription(&self, subscription: u32) -> TransportResult<()> {
        self.respond().await?;
        match self.state.lock().subscriptions.remove(&subscription) {
            Some(_) => Ok(()),
            None => Err(TransportError::new(
                StatusCode::BAD,
                format!("subscription {} does not exist", subscription),
            )),
        }
    }

    async fn browse(&self, parent: Option<&str>) -> TransportResult<Vec<BrowseEntry>> {
        self.respond().await?;
        let state = self.state.lock();
        if let Some(parent) = parent {
            if !state.nodes.contains_key(parent) {
                return Err(StatusCode::BAD_NODE_ID_UNKNOWN.into());
            }
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == parent)
            .map(|(address, node)| BrowseEntry {
                address: address.clone(),
                display_name: node.display_name.clone(),
                is_folder: node.is_folder,
                data_type: node.data_type,
            })
            .collect())
    }

    async fn read_history(&self, query: &HistoryQuery) -> TransportResult<Vec<HistorySample>> {
        self.respond().await?;
        let state = self.state.lock();
        let mut samples = Vec::new();
        for address in &query.addresses {
            let window = state
                .history
                .get(address)
                .into_iter()
                .flatten()
                .filter(|(t, _)| *t >= query.start && *t < query.end);
            let limit = if query.max_values == 0 {
                usize::MAX
            } else {
                query.max_values as usize
            };
            samples.extend(window.take(limit).map(|(t, v)| HistorySample {
                address: address.clone(),
                data: DataValue {
                    value: v.clone(),
                    status: StatusCode::GOOD,
                    source_timestamp: Some(*t),
                },
                timestamp: *t,
            }));
        }
        Ok(samples)
    }

    async fn acknowledge(&self, event_id: &str, comment: &str) -> TransportResult<()> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;
        let mut state = self.state.lock();
        match state.events.get_mut(event_id) {
            Some(ack) => {
                *ack = AckState::Acknowledged;
                state.acks.push((event_id.to_string(), comment.to_string()));
                Ok(())
            }
            None => Err(StatusCode::BAD_EVENT_ID_UNKNOWN.into()),
        }
    }
}
