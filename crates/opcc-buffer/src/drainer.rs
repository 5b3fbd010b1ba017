// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Periodic delivery of buffered records to the outbound sink.
//!
//! The drainer is a [`PeriodicTask`]. Each run peeks one batch, publishes it
//! through the generic resilience policy (breaker keyed by sink name, retries
//! for transient sink errors) and commits it only after the sink accepted it.
//! A run that finds another drain in progress is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opcc_core::error::ClientError;
use opcc_core::resilience::ResiliencePolicy;
use opcc_core::scheduler::PeriodicTask;
use opcc_core::sink::OutboundSink;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::DataBuffer;

/// Outcome of one drain run.
#[derive(Debug)]
pub enum DrainOutcome {
    /// Nothing was buffered.
    Empty,
    /// Another drain was running.
    Skipped,
    /// A batch was published and committed.
    Published {
        /// Records delivered.
        records: usize,
    },
    /// Publishing failed; the batch stays buffered.
    Failed {
        /// Final error.
        error: ClientError,
    },
}

/// Drain metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainMetrics {
    /// Runs that published or tried to publish.
    pub runs: u64,
    /// Runs skipped because a drain was in progress.
    pub skipped: u64,
    /// Batches delivered.
    pub batches_published: u64,
    /// Records delivered.
    pub records_published: u64,
    /// Runs that failed.
    pub failures: u64,
    /// Average publish duration in microseconds.
    pub avg_publish_us: u64,
    /// Time of the last successful delivery.
    pub last_published: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    runs: AtomicU64,
    skipped: AtomicU64,
    batches: AtomicU64,
    records: AtomicU64,
    failures: AtomicU64,
    publish_us: AtomicU64,
    last_published: RwLock<Option<DateTime<Utc>>>,
}

impl MetricsInner {
    fn record_success(&self, records: usize, duration_us: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records as u64, Ordering::Relaxed);
        self.publish_us.fetch_add(duration_us, Ordering::Relaxed);
        *self.last_published.write() = Some(Utc::now());
    }

    fn snapshot(&self) -> DrainMetrics {
        let batches = self.batches.load(Ordering::Relaxed);
        let total_us = self.publish_us.load(Ordering::Relaxed);
        DrainMetrics {
            runs: self.runs.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            batches_published: batches,
            records_published: self.records.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            avg_publish_us: if batches > 0 { total_us / batches } else { 0 },
            last_published: *self.last_published.read(),
        }
    }
}

// =============================================================================
// BufferDrainer
// =============================================================================

/// Moves records from the [`DataBuffer`] to an [`OutboundSink`].
pub struct BufferDrainer {
    buffer: Arc<DataBuffer>,
    sink: Arc<dyn OutboundSink>,
    policy: Arc<ResiliencePolicy>,
    batch_size: usize,
    draining: AtomicBool,
    cancel: CancellationToken,
    metrics: MetricsInner,
}

/// Resets the in-progress flag when a drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BufferDrainer {
    /// Creates a drainer publishing batches of up to `batch_size` records.
    ///
    /// `cancel` aborts in-flight retries of periodic runs.
    pub fn new(
        buffer: Arc<DataBuffer>,
        sink: Arc<dyn OutboundSink>,
        policy: Arc<ResiliencePolicy>,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            sink,
            policy,
            batch_size: batch_size.max(1),
            draining: AtomicBool::new(false),
            cancel,
            metrics: MetricsInner::default(),
        }
    }

    /// Drains one batch unless a drain is already running.
    pub async fn drain_once(&self, cancel: &CancellationToken) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
            return DrainOutcome::Skipped;
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self.buffer.peek(self.batch_size);
        if batch.is_empty() {
            return DrainOutcome::Empty;
        }

        self.metrics.runs.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let sink = &self.sink;
        let records = &batch.records;

        let result = self
            .policy
            .execute(sink.name(), cancel, || async move {
                sink.publish(records).await.map_err(ClientError::from)
            })
            .await;

        match result {
            Ok(()) => {
                let committed = self.buffer.commit(&batch);
                self.metrics
                    .record_success(batch.len(), started.elapsed().as_micros() as u64);
                debug!(
                    sink = sink.name(),
                    records = batch.len(),
                    committed,
                    remaining = self.buffer.len(),
                    "Drained batch"
                );
                DrainOutcome::Published {
                    records: batch.len(),
                }
            }
            Err(error) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = sink.name(),
                    records = batch.len(),
                    error = %error,
                    error_type = error.error_type(),
                    "Drain failed, batch stays buffered"
                );
                DrainOutcome::Failed { error }
            }
        }
    }

    /// Drains until the buffer is empty or a publish fails.
    ///
    /// Returns the number of records delivered.
    pub async fn drain_all(&self, cancel: &CancellationToken) -> usize {
        let mut delivered = 0;
        loop {
            match self.drain_once(cancel).await {
                DrainOutcome::Published { records } => delivered += records,
                DrainOutcome::Empty | DrainOutcome::Skipped | DrainOutcome::Failed { .. } => {
                    return delivered
                }
            }
        }
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> DrainMetrics {
        self.metrics.snapshot()
    }

    /// The drained buffer.
    pub fn buffer(&self) -> &Arc<DataBuffer> {
        &self.buffer
    }
}

impl std::fmt::Debug for BufferDrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferDrainer")
            .field("sink", &self.sink.name())
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

#[async_trait]
impl PeriodicTask for BufferDrainer {
    fn name(&self) -> &str {
        "buffer-drainer"
    }

    async fn run_once(&self) {
        let cancel = self.cancel.clone();
        let _ = self.drain_once(&cancel).await;
    }

    async fn on_shutdown(&self) {
        // Periodic token is already cancelled here.
        let delivered = self.drain_all(&CancellationToken::new()).await;
        info!(
            delivered,
            remaining = self.buffer.len(),
            sink = self.sink.name(),
            "Final drain complete"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
