// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded in-memory holding area for outbound records.
//!
//! # Features
//!
//! - **O(1) Length**: atomic counter, no lock for `len()` / `is_empty()`
//! - **Per-Record Overflow Policy**: discard-oldest evicts the head,
//!   discard-newest rejects the incoming record
//! - **Bounded Waiting**: [`DataBuffer::push_timeout`] waits for a drain to
//!   free space before rejecting under discard-newest; discard-oldest never
//!   waits
//! - **At-Least-Once Draining**: records are peeked, published, then
//!   committed by sequence number, so evictions between peek and commit never
//!   remove records that were not published
//!
//! ```
//! use opcc_buffer::{DataBuffer, OverflowPolicy};
//! # use opcc_core::sink::OutboundRecord;
//! # use opcc_core::status::{ClientHealthStatus, OverallStatus, ResourceMetrics};
//! # let record = OutboundRecord::health(ClientHealthStatus {
//! #     client_id: "c".into(), overall: OverallStatus::Healthy, servers: vec![],
//! #     subscriptions: vec![], buffered_items: 0, resources: ResourceMetrics::default(),
//! #     timestamp: chrono::Utc::now() });
//!
//! let buffer = DataBuffer::new(2);
//! buffer.push(record, OverflowPolicy::DiscardOldest).unwrap();
//! assert_eq!(buffer.len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use opcc_config::BufferConfig;
use opcc_core::error::BufferError;
use opcc_core::sink::OutboundRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace};

// =============================================================================
// Policy and outcomes
// =============================================================================

/// What happens to a push when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered record.
    DiscardOldest,
    /// Reject the incoming record.
    DiscardNewest,
}

impl OverflowPolicy {
    /// Maps a `discard_oldest` flag onto a policy.
    pub fn from_discard_oldest(discard_oldest: bool) -> Self {
        if discard_oldest {
            Self::DiscardOldest
        } else {
            Self::DiscardNewest
        }
    }

    /// Returns `true` if a full buffer would reject the record.
    pub fn rejects_when_full(self) -> bool {
        matches!(self, Self::DiscardNewest)
    }
}

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without eviction.
    Stored,
    /// Stored after evicting the oldest record.
    EvictedOldest,
}

/// A batch peeked for delivery.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Records in FIFO order.
    pub records: Vec<OutboundRecord>,
    through: Option<u64>,
}

impl Batch {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when nothing was peeked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time buffer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Configured capacity.
    pub capacity: usize,
    /// Records currently buffered.
    pub current_items: usize,
    /// Records accepted (cumulative).
    pub items_pushed: u64,
    /// Records evicted by discard-oldest (cumulative).
    pub items_evicted: u64,
    /// Records rejected by discard-newest (cumulative).
    pub items_rejected: u64,
    /// Records committed after delivery (cumulative).
    pub items_drained: u64,
}

impl BufferStats {
    /// Records lost to overflow.
    pub fn items_dropped(&self) -> u64 {
        self.items_evicted + self.items_rejected
    }

    /// Fill ratio in 0.0..=1.0.
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.current_items as f64 / self.capacity as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    pushed: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    drained: AtomicU64,
}

// =============================================================================
// DataBuffer
// =============================================================================

#[derive(Debug)]
struct Entry {
    seq: u64,
    record: OutboundRecord,
}

/// Bounded FIFO of outbound records shared by all producers.
#[derive(Debug)]
pub struct DataBuffer {
    queue: Mutex<VecDeque<Entry>>,
    capacity: usize,
    len: AtomicUsize,
    next_seq: AtomicU64,
    space: Notify,
    closed: AtomicBool,
    stats: StatsInner,
}

impl DataBuffer {
    /// Creates a buffer holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(100_000))),
            capacity,
            len: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            stats: StatsInner::default(),
        }
    }

    /// Creates a buffer from the `buffer` config section.
    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered records, in O(1).
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns `true` when nothing is buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rejects further pushes and wakes waiting producers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.notify_waiters();
    }

    /// Stores `record`, applying `policy` if the buffer is full. Never waits.
    ///
    /// # Errors
    ///
    /// [`BufferError::Full`] when full under discard-newest,
    /// [`BufferError::Closed`] after close.
    pub fn push(&self, record: OutboundRecord, policy: OverflowPolicy) -> Result<PushOutcome, BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }

        let mut queue = self.queue.lock();
        let outcome = if queue.len() >= self.capacity {
            match policy {
                OverflowPolicy::DiscardNewest => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    trace!(capacity = self.capacity, "Buffer full, rejecting newest record");
                    return Err(BufferError::Full {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DiscardOldest => {
                    queue.pop_front();
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                    trace!(capacity = self.capacity, "Buffer full, evicted oldest record");
                    PushOutcome::EvictedOldest
                }
            }
        } else {
            PushOutcome::Stored
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        queue.push_back(Entry { seq, record });
        self.len.store(queue.len(), Ordering::Release);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Like [`push`](Self::push), but under discard-newest waits up to
    /// `timeout` for a drain to free space before rejecting. Discard-oldest
    /// stores immediately.
    pub async fn push_timeout(
        &self,
        record: OutboundRecord,
        policy: OverflowPolicy,
        timeout: Duration,
    ) -> Result<PushOutcome, BufferError> {
        if !policy.rejects_when_full() {
            return self.push(record, policy);
        }
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(BufferError::Closed);
            }
            if self.len() < self.capacity {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        self.push(record, policy)
    }

    /// Returns up to `limit` records from the head without removing them.
    pub fn peek(&self, limit: usize) -> Batch {
        let queue = self.queue.lock();
        let mut batch = Batch {
            records: Vec::with_capacity(limit.min(queue.len())),
            through: None,
        };
        for entry in queue.iter().take(limit) {
            batch.records.push(entry.record.clone());
            batch.through = Some(entry.seq);
        }
        batch
    }

    /// Removes the records of a delivered batch still at the head.
    ///
    /// Records evicted since the peek are not counted twice. Returns the
    /// number of records removed.
    pub fn commit(&self, batch: &Batch) -> usize {
        let Some(through) = batch.through else {
            return 0;
        };

        let removed = {
            let mut queue = self.queue.lock();
            let mut removed = 0;
            while queue.front().is_some_and(|e| e.seq <= through) {
                queue.pop_front();
                removed += 1;
            }
            self.len.store(queue.len(), Ordering::Release);
            removed
        };

        if removed > 0 {
            self.stats.drained.fetch_add(removed as u64, Ordering::Relaxed);
            self.space.notify_waiters();
            debug!(removed, remaining = self.len(), "Committed delivered batch");
        }
        removed
    }

    /// Discards everything.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut queue = self.queue.lock();
            let removed = queue.len();
            queue.clear();
            self.len.store(0, Ordering::Release);
            removed
        };
        self.space.notify_waiters();
        removed
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity,
            current_items: self.len(),
            items_pushed: self.stats.pushed.load(Ordering::Relaxed),
            items_evicted: self.stats.evicted.load(Ordering::Relaxed),
            items_rejected: self.stats.rejected.load(Ordering::Relaxed),
            items_drained: self.stats.drained.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use opcc_core::sink::OutboundPayload;
    use opcc_core::types::{DataPoint, Quality, ServerId, TagId, Value};

    fn record(value: f64) -> OutboundRecord {
        OutboundRecord::data_point(
            "client-1",
            DataPoint::new(
                ServerId::new("plc-1"),
                TagId::new("temp"),
                Value::Float64(value),
                Quality::Good,
            ),
        )
    }

    fn value_of(record: &OutboundRecord) -> Option<f64> {
        match &record.payload {
            OutboundPayload::DataPoint(dp) => dp.value.as_f64(),
            _ => None,
        }
    }

    #[test]
    fn test_fifo_peek_and_commit() {
        let buffer = DataBuffer::new(10);
        for i in 0..5 {
            buffer.push(record(i as f64), OverflowPolicy::DiscardOldest).unwrap();
        }

        let batch = buffer.peek(3);
        let values: Vec<_> = batch.records.iter().filter_map(value_of).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0]);
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.commit(&batch), 3);
        assert_eq!(buffer.len(), 2);
        assert_eq!(value_of(&buffer.peek(1).records[0]), Some(3.0));
    }

    #[test]
    fn test_discard_oldest_keeps_newest() {
        let buffer = DataBuffer::new(3);
        for i in 0..3 {
            buffer.push(record(i as f64), OverflowPolicy::DiscardOldest).unwrap();
        }
        let outcome = buffer.push(record(3.0), OverflowPolicy::DiscardOldest).unwrap();
        assert_eq!(outcome, PushOutcome::EvictedOldest);

        let values: Vec<_> = buffer.peek(10).records.iter().filter_map(value_of).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(buffer.stats().items_evicted, 1);
    }

    #[test]
    fn test_discard_newest_rejects_incoming() {
        let buffer = DataBuffer::new(2);
        buffer.push(record(0.0), OverflowPolicy::DiscardNewest).unwrap();
        buffer.push(record(1.0), OverflowPolicy::DiscardNewest).unwrap();

        let err = buffer.push(record(2.0), OverflowPolicy::DiscardNewest).unwrap_err();
        assert!(matches!(err, BufferError::Full { capacity: 2 }));

        let values: Vec<_> = buffer.peek(10).records.iter().filter_map(value_of).collect();
        assert_eq!(values, vec![0.0, 1.0]);
        assert_eq!(buffer.stats().items_dropped(), 1);
    }

    #[test]
    fn test_commit_after_eviction_keeps_unsent() {
        let buffer = DataBuffer::new(3);
        for i in 0..3 {
            buffer.push(record(i as f64), OverflowPolicy::DiscardOldest).unwrap();
        }
        let batch = buffer.peek(2);

        // Two evictions while the batch is in flight.
        buffer.push(record(3.0), OverflowPolicy::DiscardOldest).unwrap();
        buffer.push(record(4.0), OverflowPolicy::DiscardOldest).unwrap();

        assert_eq!(buffer.commit(&batch), 0);
        let values: Vec<_> = buffer.peek(10).records.iter().filter_map(value_of).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_round_trip_preserves_record() {
        let buffer = DataBuffer::new(4);
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut point = DataPoint::new(
            ServerId::new("plc-1"),
            TagId::new("line1.speed"),
            Value::Int32(-17),
            Quality::Uncertain("UncertainLastUsableValue".into()),
        );
        point.timestamp = ts;
        let original = OutboundRecord::data_point("client-1", point);

        buffer.push(original.clone(), OverflowPolicy::DiscardOldest).unwrap();
        let batch = buffer.peek(1);
        assert_eq!(batch.records[0], original);
    }

    #[test]
    fn test_closed_buffer_rejects() {
        let buffer = DataBuffer::new(4);
        buffer.close();
        assert!(matches!(
            buffer.push(record(1.0), OverflowPolicy::DiscardOldest),
            Err(BufferError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_push_timeout_woken_by_commit() {
        let buffer = Arc::new(DataBuffer::new(1));
        buffer.push(record(0.0), OverflowPolicy::DiscardNewest).unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                buffer
                    .push_timeout(record(1.0), OverflowPolicy::DiscardNewest, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let batch = buffer.peek(1);
        buffer.commit(&batch);

        assert_eq!(producer.await.unwrap().unwrap(), PushOutcome::Stored);
        assert_eq!(value_of(&buffer.peek(1).records[0]), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_timeout_applies_policy_after_wait() {
        let buffer = DataBuffer::new(1);
        buffer.push(record(0.0), OverflowPolicy::DiscardOldest).unwrap();

        let err = buffer
            .push_timeout(record(1.0), OverflowPolicy::DiscardNewest, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BufferError::Full { .. }));

        let outcome = buffer
            .push_timeout(record(2.0), OverflowPolicy::DiscardOldest, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::EvictedOldest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_timeout_discard_oldest_never_waits() {
        let buffer = DataBuffer::new(1);
        buffer.push(record(0.0), OverflowPolicy::DiscardOldest).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = buffer
            .push_timeout(record(1.0), OverflowPolicy::DiscardOldest, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::EvictedOldest);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(value_of(&buffer.peek(1).records[0]), Some(1.0));
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let buffer = Arc::new(DataBuffer::new(10_000));
        let mut handles = vec![];
        for i in 0..10 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    buffer
                        .push(record((i * 100 + j) as f64), OverflowPolicy::DiscardOldest)
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.stats().items_pushed, 1000);
    }
}
