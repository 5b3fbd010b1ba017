// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Critical-write auditing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opcc_buffer::{DataBuffer, OverflowPolicy};
use opcc_core::audit::{AuditLogger, CriticalWriteLog};
use opcc_core::sink::OutboundRecord;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Auditor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorMetrics {
    /// Records handed to the auditor.
    pub submitted: u64,
    /// Records the logger accepted.
    pub logged: u64,
    /// Records the logger rejected.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    logged: AtomicU64,
    failed: AtomicU64,
}

/// Persists critical-write records off the write path.
///
/// Each record is logged on its own task; failures are reported through
/// `tracing` and counted, never returned to the writer. Records are also
/// forwarded to the outbound buffer when one is attached.
pub struct CriticalWriteAuditor {
    client_id: String,
    logger: Arc<dyn AuditLogger>,
    buffer: Option<(Arc<DataBuffer>, OverflowPolicy)>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl CriticalWriteAuditor {
    /// Creates an auditor writing to `logger`.
    pub fn new(client_id: impl Into<String>, logger: Arc<dyn AuditLogger>) -> Self {
        Self {
            client_id: client_id.into(),
            logger,
            buffer: None,
            tracker: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Also publishes each record through `buffer`.
    pub fn with_buffer(mut self, buffer: Arc<DataBuffer>, policy: OverflowPolicy) -> Self {
        self.buffer = Some((buffer, policy));
        self
    }

    /// Submits a record for asynchronous logging.
    pub fn submit(&self, entry: CriticalWriteLog) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let logger = self.logger.clone();
        let counters = self.counters.clone();
        let buffer = self.buffer.clone();
        let client_id = self.client_id.clone();

        self.tracker.spawn(async move {
            match logger.log(&entry).await {
                Ok(()) => {
                    counters.logged.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        request_id = %entry.request_id,
                        server_id = %entry.server_id,
                        logger = logger.name(),
                        error = %e,
                        "Failed to audit critical write"
                    );
                }
            }

            if let Some((buffer, policy)) = buffer {
                let request_id = entry.request_id;
                if let Err(e) = buffer.push(OutboundRecord::critical_write(&client_id, entry), policy) {
                    debug!(request_id = %request_id, error = %e, "Audit record not buffered");
                }
            }
        });
    }

    /// Waits until every submitted record has been processed.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Waits for pending records, then flushes the logger.
    pub async fn flush(&self) {
        self.wait_idle().await;
        if let Err(e) = self.logger.flush().await {
            error!(logger = self.logger.name(), error = %e, "Failed to flush audit logger");
        }
    }

    /// Records still being logged.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Current counters.
    pub fn metrics(&self) -> AuditorMetrics {
        AuditorMetrics {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            logged: self.counters.logged.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CriticalWriteAuditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalWriteAuditor")
            .field("logger", &self.logger.name())
            .field("metrics", &self.metrics())
            .finish()
    }
}
