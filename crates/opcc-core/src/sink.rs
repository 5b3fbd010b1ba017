// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Outbound records and the sink they are published to.
//!
//! Everything the client core emits (data points, alarms, health snapshots,
//! subscription status and critical-write logs) travels as an
//! [`OutboundRecord`]: a payload plus [`RoutingMetadata`] the downstream bus
//! uses to route it. Delivery is at-least-once and best-effort; the drainer
//! only removes records from the buffer after `publish` succeeded.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audit::CriticalWriteLog;
use crate::error::SinkError;
use crate::status::{ClientHealthStatus, OverallStatus, SubscriptionStatus, SubscriptionStatusReport};
use crate::types::{AlarmEvent, DataPoint, ServerId};

// =============================================================================
// Routing metadata
// =============================================================================

/// Kind of payload carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Tag value.
    DataPoint,
    /// Alarm event.
    Alarm,
    /// Client health snapshot.
    Health,
    /// Subscription status change.
    SubscriptionStatus,
    /// Critical-write audit record.
    CriticalWrite,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DataPoint => "data_point",
            Self::Alarm => "alarm",
            Self::Health => "health",
            Self::SubscriptionStatus => "subscription_status",
            Self::CriticalWrite => "critical_write",
        };
        f.write_str(s)
    }
}

/// Routing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine telemetry.
    Low,
    /// Needs attention.
    Medium,
    /// Operator action likely required.
    High,
    /// Immediate action required.
    Critical,
}

impl Severity {
    /// Maps an OPC event severity (1..=1000) into a routing severity.
    pub fn from_event_severity(severity: u16) -> Self {
        match severity {
            0..=250 => Self::Low,
            251..=500 => Self::Medium,
            501..=750 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Routing information attached to every outbound record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    /// Client identity.
    pub client_id: String,
    /// Originating server, when the record is server-scoped.
    pub server_id: Option<ServerId>,
    /// Routing severity.
    pub severity: Severity,
    /// Payload kind.
    pub kind: RecordKind,
}

/// Record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OutboundPayload {
    /// Tag value.
    DataPoint(DataPoint),
    /// Alarm event.
    Alarm(AlarmEvent),
    /// Health snapshot.
    Health(Box<ClientHealthStatus>),
    /// Subscription status.
    SubscriptionStatus(SubscriptionStatusReport),
    /// Critical-write audit record.
    CriticalWrite(CriticalWriteLog),
}

/// A payload with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRecord {
    /// Routing metadata.
    pub routing: RoutingMetadata,
    /// Payload.
    pub payload: OutboundPayload,
}

impl OutboundRecord {
    /// Wraps a data point; bad quality raises the severity.
    pub fn data_point(client_id: &str, point: DataPoint) -> Self {
        let severity = if point.quality.is_bad() {
            Severity::Medium
        } else {
            Severity::Low
        };
        Self {
            routing: RoutingMetadata {
                client_id: client_id.to_string(),
                server_id: Some(point.server_id.clone()),
                severity,
                kind: RecordKind::DataPoint,
            },
            payload: OutboundPayload::DataPoint(point),
        }
    }

    /// Wraps an alarm event.
    pub fn alarm(client_id: &str, event: AlarmEvent) -> Self {
        Self {
            routing: RoutingMetadata {
                client_id: client_id.to_string(),
                server_id: Some(event.server_id.clone()),
                severity: Severity::from_event_severity(event.clamped_severity()),
                kind: RecordKind::Alarm,
            },
            payload: OutboundPayload::Alarm(event),
        }
    }

    /// Wraps a health snapshot.
    pub fn health(status: ClientHealthStatus) -> Self {
        let severity = match status.overall {
            OverallStatus::Healthy => Severity::Low,
            OverallStatus::Degraded => Severity::Medium,
            OverallStatus::Unhealthy => Severity::Critical,
        };
        Self {
            routing: RoutingMetadata {
                client_id: status.client_id.clone(),
                server_id: None,
                severity,
                kind: RecordKind::Health,
            },
            payload: OutboundPayload::Health(Box::new(status)),
        }
    }

    /// Wraps a subscription status report.
    pub fn subscription_status(client_id: &str, report: SubscriptionStatusReport) -> Self {
        let severity = match report.status {
            SubscriptionStatus::Active | SubscriptionStatus::NoConfig => Severity::Low,
            SubscriptionStatus::Connecting | SubscriptionStatus::Disconnected => Severity::Medium,
            SubscriptionStatus::Error => Severity::High,
        };
        Self {
            routing: RoutingMetadata {
                client_id: client_id.to_string(),
                server_id: Some(report.server_id.clone()),
                severity,
                kind: RecordKind::SubscriptionStatus,
            },
            payload: OutboundPayload::SubscriptionStatus(report),
        }
    }

    /// Wraps a critical-write audit record.
    pub fn critical_write(client_id: &str, log: CriticalWriteLog) -> Self {
        Self {
            routing: RoutingMetadata {
                client_id: client_id.to_string(),
                server_id: Some(log.server_id.clone()),
                severity: Severity::High,
                kind: RecordKind::CriticalWrite,
            },
            payload: OutboundPayload::CriticalWrite(log),
        }
    }

    /// Payload kind.
    pub fn kind(&self) -> RecordKind {
        self.routing.kind
    }
}

// =============================================================================
// Sink
// =============================================================================

/// Downstream destination for outbound records.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Publishes a batch. On error the whole batch is retried later.
    async fn publish(&self, batch: &[OutboundRecord]) -> Result<(), SinkError>;

    /// Sink name; also the circuit breaker target.
    fn name(&self) -> &str;
}

/// Logs every record through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl OutboundSink for LoggingSink {
    async fn publish(&self, batch: &[OutboundRecord]) -> Result<(), SinkError> {
        for record in batch {
            let payload = serde_json::to_string(&record.payload)
                .map_err(|e| SinkError::rejected(e.to_string()))?;
            tracing::info!(
                target: "outbound",
                kind = %record.routing.kind,
                client_id = %record.routing.client_id,
                server_id = record.routing.server_id.as_ref().map(|s| s.as_str()),
                severity = ?record.routing.severity,
                payload = %payload,
                "Outbound record"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Records batches in memory, with failure injection.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<OutboundRecord>>,
    failing: AtomicBool,
    fail_next: AtomicU32,
    publish_calls: AtomicU64,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail with `Unavailable` while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `n` publishes fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Returns a copy of everything published so far.
    pub fn records(&self) -> Vec<OutboundRecord> {
        self.records.lock().clone()
    }

    /// Number of published records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of publish calls, including failed ones.
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundSink for MemorySink {
    async fn publish(&self, batch: &[OutboundRecord]) -> Result<(), SinkError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::unavailable("sink marked failing"));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::unavailable("injected failure"));
        }

        self.records.lock().extend_from_slice(batch);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
