// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Critical-write audit records and the audit logger seam.
//!
//! A [`CriticalWriteLog`] captures who changed which tags, from what to what,
//! and whether the device accepted it. Loggers receive records after the
//! write completed; a failing logger never affects the write outcome.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ServerId, TagId, Value};

// =============================================================================
// Records
// =============================================================================

/// Old and new value of one written tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditedItem {
    /// Tag written.
    pub tag_id: TagId,
    /// Value before the write, when the pre-fetch succeeded.
    pub old_value: Option<Value>,
    /// Value written.
    pub new_value: Value,
    /// Whether the device accepted the value.
    pub success: bool,
    /// Device error, if rejected.
    pub error: Option<String>,
}

/// Audit record of a critical write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalWriteLog {
    /// Record id (UUIDv7, time-ordered).
    pub id: Uuid,
    /// Id of the originating write request.
    pub request_id: Uuid,
    /// Target server.
    pub server_id: ServerId,
    /// Initiating user.
    pub user_id: String,
    /// Initiating client address.
    pub client_address: Option<String>,
    /// Reason given for the write.
    pub reason: Option<String>,
    /// Correlation id for tracing across systems.
    pub correlation_id: Option<String>,
    /// Per-tag details.
    pub items: Vec<AuditedItem>,
    /// Whether every item succeeded.
    pub success: bool,
    /// Record time.
    pub timestamp: DateTime<Utc>,
}

impl CriticalWriteLog {
    /// Creates a record for `request_id`.
    pub fn new(request_id: Uuid, server_id: ServerId, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id,
            server_id,
            user_id: user_id.into(),
            client_address: None,
            reason: None,
            correlation_id: None,
            items: Vec::new(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Appends an item and folds its outcome into `success`.
    pub fn with_item(mut self, item: AuditedItem) -> Self {
        self.success &= item.success;
        self.items.push(item);
        self
    }
}

// =============================================================================
// Logger
// =============================================================================

/// Audit logger errors.
#[derive(Debug, Clone, Error)]
pub enum AuditError {
    /// The backing store rejected the record.
    #[error("Audit storage failed: {0}")]
    Storage(String),

    /// The logger is shut down.
    #[error("Audit logger closed")]
    Closed,
}

/// Destination for critical-write audit records.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Persists one record.
    async fn log(&self, entry: &CriticalWriteLog) -> Result<(), AuditError>;

    /// Flushes buffered records.
    async fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }

    /// Logger name.
    fn name(&self) -> &str {
        "audit_logger"
    }
}

/// Writes audit records to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &CriticalWriteLog) -> Result<(), AuditError> {
        let items = serde_json::to_string(&entry.items).map_err(|e| AuditError::Storage(e.to_string()))?;
        tracing::info!(
            target: "audit",
            audit_id = %entry.id,
            request_id = %entry.request_id,
            server_id = %entry.server_id,
            user_id = %entry.user_id,
            success = entry.success,
            items = %items,
            "Critical write"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Keeps records in memory, bounded by `capacity`.
#[derive(Debug)]
pub struct InMemoryAuditLogger {
    entries: RwLock<Vec<CriticalWriteLog>>,
    capacity: usize,
    total: AtomicU64,
}

impl InMemoryAuditLogger {
    /// Creates a logger keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    /// Returns a copy of the retained records.
    pub fn entries(&self) -> Vec<CriticalWriteLog> {
        self.entries.read().clone()
    }

    /// Number of records ever logged.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryAuditLogger {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLogger {
    async fn log(&self, entry: &CriticalWriteLog) -> Result<(), AuditError> {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push(entry.clone());
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
