// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Mocks of the core traits for testing components in isolation.
//!
//! - [`MockProtocolClient`]: a [`ProtocolClient`] with injectable latency and
//!   failures that records every call
//! - [`RecordingStatusSink`]: keeps every connection [`StatusChange`]
//! - [`FailingAuditLogger`]: an [`AuditLogger`] that rejects records

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opcc_client::{StatusChange, StatusSink};
use opcc_core::audit::{AuditError, AuditLogger, CriticalWriteLog};
use opcc_core::client::{
    event_channel, Capabilities, ClientEvent, ProtocolClient, ReadValue, WriteItem,
};
use opcc_core::error::{ClientError, ClientResult};
use opcc_core::status::ConnectionStatus;
use opcc_core::types::{ProtocolKind, Quality, ServerId, Value};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// =============================================================================
// Mock Protocol Client
// =============================================================================

/// A configurable OPC UA client without a transport.
#[derive(Debug)]
pub struct MockProtocolClient {
    server_id: ServerId,

    /// Values returned by reads, keyed by address.
    values: Mutex<HashMap<String, Value>>,

    /// Session state.
    connected: AtomicBool,

    /// Latency of `connect`.
    connect_latency: Mutex<Duration>,

    /// Connect attempts left to fail.
    fail_connects: AtomicU32,

    /// Fail every read.
    fail_reads: AtomicBool,

    connect_count: AtomicU64,
    disconnect_count: AtomicU64,
    read_count: AtomicU64,
    write_count: AtomicU64,

    /// Every written item, in order.
    write_history: Mutex<Vec<(String, Value)>>,

    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
}

impl MockProtocolClient {
    /// Creates a disconnected mock.
    pub fn new(server_id: impl Into<ServerId>) -> Self {
        let (tx, rx) = event_channel();
        Self {
            server_id: server_id.into(),
            values: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            connect_latency: Mutex::new(Duration::ZERO),
            fail_connects: AtomicU32::new(0),
            fail_reads: AtomicBool::new(false),
            connect_count: AtomicU64::new(0),
            disconnect_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            write_history: Mutex::new(Vec::new()),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Sets a value for an address.
    pub fn set_value(&self, address: impl Into<String>, value: Value) {
        self.values.lock().insert(address.into(), value);
    }

    /// Sets the latency of `connect`.
    pub fn set_connect_latency(&self, latency: Duration) {
        *self.connect_latency.lock() = latency;
    }

    /// Fails the next `n` connects.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fails every read while set.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Pushes an event onto the client's stream.
    pub async fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u64 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    /// Number of `read` calls.
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Number of `write` calls.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Every written item.
    pub fn write_history(&self) -> Vec<(String, Value)> {
        self.write_history.lock().clone()
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Ua
    }

    fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::UA
    }

    async fn connect(&self) -> ClientResult<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let latency = *self.connect_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::connection_failed("mock connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events_rx.lock().take()
    }

    async fn read(&self, addresses: &[String]) -> ClientResult<Vec<ReadValue>> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ClientError::communication("mock read failure"));
        }

        let values = self.values.lock();
        Ok(addresses
            .iter()
            .map(|address| match values.get(address) {
                Some(value) => ReadValue {
                    address: address.clone(),
                    value: value.clone(),
                    quality: Quality::Good,
                    source_timestamp: None,
                },
                None => ReadValue {
                    address: address.clone(),
                    value: Value::Null,
                    quality: Quality::Bad("unknown node".to_string()),
                    source_timestamp: None,
                },
            })
            .collect())
    }

    async fn write(&self, items: &[WriteItem]) -> ClientResult<Vec<ClientResult<()>>> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let mut values = self.values.lock();
        let mut history = self.write_history.lock();
        Ok(items
            .iter()
            .map(|item| {
                values.insert(item.address.clone(), item.value.clone());
                history.push((item.address.clone(), item.value.clone()));
                Ok(())
            })
            .collect())
    }
}

// =============================================================================
// Recording Status Sink
// =============================================================================

/// Keeps every status change it receives.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    changes: Mutex<Vec<StatusChange>>,
}

impl RecordingStatusSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every change, oldest first.
    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes.lock().clone()
    }

    /// Target states of the changes for `server_id`, oldest first.
    pub fn states_of(&self, server_id: &str) -> Vec<ConnectionStatus> {
        self.changes
            .lock()
            .iter()
            .filter(|c| c.server_id.as_str() == server_id)
            .map(|c| c.to)
            .collect()
    }

    /// Forgets recorded changes.
    pub fn clear(&self) {
        self.changes.lock().clear();
    }
}

impl StatusSink for RecordingStatusSink {
    fn on_status_change(&self, change: &StatusChange) {
        self.changes.lock().push(change.clone());
    }
}

// =============================================================================
// Failing Audit Logger
// =============================================================================

/// Rejects every record and counts the attempts.
#[derive(Debug, Default)]
pub struct FailingAuditLogger {
    attempts: AtomicU64,
}

impl FailingAuditLogger {
    /// Creates the logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records offered so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditLogger for FailingAuditLogger {
    async fn log(&self, _entry: &CriticalWriteLog) -> Result<(), AuditError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AuditError::Storage("audit store offline".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
