// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Buffer and drain integration tests.

use opcc_buffer::{BufferDrainer, DataBuffer, DrainOutcome, OverflowPolicy, PushOutcome};
use opcc_core::error::BufferError;
use opcc_core::resilience::{PolicyProfile, PolicySettings, ResiliencePolicy};
use opcc_core::retry::RetryConfig;
use opcc_core::sink::{MemorySink, OutboundPayload, OutboundRecord, RecordKind};
use opcc_core::types::DataPoint;
use opcc_tests::prelude::*;

fn values(records: &[OutboundRecord]) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| match &r.payload {
            OutboundPayload::DataPoint(p) => p.value.as_f64(),
            _ => None,
        })
        .collect()
}

fn drainer(buffer: Arc<DataBuffer>, sink: Arc<MemorySink>, retries: u32, batch_size: usize) -> BufferDrainer {
    let mut settings = PolicySettings::default();
    settings.retry = RetryConfig::default()
        .with_max_retries(retries)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5));
    BufferDrainer::new(
        buffer,
        sink,
        Arc::new(ResiliencePolicy::new(PolicyProfile::Generic, settings)),
        batch_size,
        CancellationToken::new(),
    )
}

// =============================================================================
// Round trip
// =============================================================================

#[test]
fn test_record_survives_buffer_unchanged() {
    let buffer = DataBuffer::new(8);
    let point = RecordFixtures::data_point("boiler_temp", Value::Float64(87.25));
    let uncertain = DataPoint {
        quality: Quality::Uncertain("sensor drift".into()),
        ..RecordFixtures::data_point("boiler_temp", Value::Int32(-4))
    };

    for p in [point.clone(), uncertain.clone()] {
        buffer
            .push(OutboundRecord::data_point(CLIENT_ID, p), OverflowPolicy::DiscardOldest)
            .unwrap();
    }

    let batch = buffer.peek(10);
    assert_eq!(batch.len(), 2);
    match (&batch.records[0].payload, &batch.records[1].payload) {
        (OutboundPayload::DataPoint(a), OutboundPayload::DataPoint(b)) => {
            assert_eq!(a, &point);
            assert_eq!(b, &uncertain);
            assert_eq!(a.timestamp, RecordFixtures::base_time());
            assert_eq!(a.source_timestamp, point.source_timestamp);
        }
        other => panic!("unexpected payloads {:?}", other),
    }
    assert_eq!(batch.records[0].routing.client_id, CLIENT_ID);
    assert_eq!(batch.records[0].routing.kind, RecordKind::DataPoint);

    assert_eq!(buffer.commit(&batch), 2);
    assert!(buffer.is_empty());
}

#[test]
fn test_alarm_record_keeps_event() {
    let buffer = DataBuffer::new(4);
    let event = RecordFixtures::alarm("evt-7", 800);
    buffer
        .push(OutboundRecord::alarm(CLIENT_ID, event.clone()), OverflowPolicy::DiscardOldest)
        .unwrap();

    let batch = buffer.peek(1);
    assert_eq!(batch.records[0].kind(), RecordKind::Alarm);
    assert_eq!(batch.records[0].payload, OutboundPayload::Alarm(event));
}

// =============================================================================
// Overflow
// =============================================================================

#[test]
fn test_discard_oldest_keeps_newest_records() {
    let buffer = DataBuffer::new(3);
    let mut evicted = 0;
    for record in RecordFixtures::data_point_batch("boiler_temp", 5) {
        if buffer.push(record, OverflowPolicy::DiscardOldest).unwrap() == PushOutcome::EvictedOldest {
            evicted += 1;
        }
    }

    assert_eq!(evicted, 2);
    assert_eq!(values(&buffer.peek(10).records), vec![2.0, 3.0, 4.0]);

    let stats = buffer.stats();
    assert_eq!(stats.capacity, 3);
    assert_eq!(stats.current_items, 3);
    assert_eq!(stats.items_pushed, 5);
    assert_eq!(stats.items_evicted, 2);
    assert_eq!(stats.items_dropped(), 2);
}

#[test]
fn test_discard_newest_rejects_when_full() {
    let buffer = DataBuffer::new(3);
    let mut rejected = 0;
    for record in RecordFixtures::data_point_batch("boiler_temp", 5) {
        match buffer.push(record, OverflowPolicy::DiscardNewest) {
            Ok(PushOutcome::Stored) => {}
            Err(BufferError::Full { capacity }) => {
                assert_eq!(capacity, 3);
                rejected += 1;
            }
            other => panic!("unexpected push result {:?}", other),
        }
    }

    assert_eq!(rejected, 2);
    assert_eq!(values(&buffer.peek(10).records), vec![0.0, 1.0, 2.0]);
    assert_eq!(buffer.stats().items_rejected, 2);
}

#[test]
fn test_overflow_policy_from_config_flag() {
    assert_eq!(OverflowPolicy::from_discard_oldest(true), OverflowPolicy::DiscardOldest);
    assert_eq!(OverflowPolicy::from_discard_oldest(false), OverflowPolicy::DiscardNewest);
}

#[test]
fn test_closed_buffer_rejects_pushes() {
    let buffer = DataBuffer::new(2);
    buffer.close();
    let record = OutboundRecord::alarm(CLIENT_ID, RecordFixtures::alarm("evt-1", 100));
    assert!(matches!(
        buffer.push(record, OverflowPolicy::DiscardOldest),
        Err(BufferError::Closed)
    ));
}

#[tokio::test]
async fn test_push_timeout_waits_for_space() {
    init_test_logging();
    let buffer = Arc::new(DataBuffer::new(1));
    let mut records = RecordFixtures::data_point_batch("boiler_temp", 2).into_iter();
    let first = records.next().unwrap();
    let second = records.next().unwrap();
    buffer.push(first, OverflowPolicy::DiscardNewest).unwrap();

    let pusher = {
        let buffer = buffer.clone();
        tokio::spawn(async move {
            buffer
                .push_timeout(second, OverflowPolicy::DiscardNewest, Duration::from_secs(5))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let batch = buffer.peek(1);
    assert_eq!(buffer.commit(&batch), 1);

    let outcome = within(Duration::from_secs(5), pusher).await.unwrap();
    assert_eq!(outcome.unwrap(), PushOutcome::Stored);
    assert_eq!(values(&buffer.peek(10).records), vec![1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_push_timeout_applies_policy_after_deadline() {
    let buffer = DataBuffer::new(1);
    let mut records = RecordFixtures::data_point_batch("boiler_temp", 2).into_iter();
    buffer.push(records.next().unwrap(), OverflowPolicy::DiscardNewest).unwrap();

    let result = buffer
        .push_timeout(
            records.next().unwrap(),
            OverflowPolicy::DiscardNewest,
            Duration::from_millis(100),
        )
        .await;
    assert!(matches!(result, Err(BufferError::Full { capacity: 1 })));
}

// =============================================================================
// Draining
// =============================================================================

#[tokio::test]
async fn test_drain_delivers_in_order() {
    init_test_logging();
    let buffer = Arc::new(DataBuffer::new(100));
    let sink = Arc::new(MemorySink::new());
    for record in RecordFixtures::data_point_batch("boiler_temp", 10) {
        buffer.push(record, OverflowPolicy::DiscardOldest).unwrap();
    }

    let drainer = drainer(buffer.clone(), sink.clone(), 0, 4);
    let delivered = drainer.drain_all(&CancellationToken::new()).await;

    assert_eq!(delivered, 10);
    assert!(buffer.is_empty());
    assert_eq!(values(&sink.records()), (0..10u32).map(f64::from).collect::<Vec<_>>());
    assert_eq!(sink.publish_calls(), 3);

    let metrics = drainer.metrics();
    assert_eq!(metrics.batches_published, 3);
    assert_eq!(metrics.records_published, 10);
    assert_eq!(metrics.failures, 0);
    assert!(metrics.last_published.is_some());
}

#[tokio::test]
async fn test_failed_publish_keeps_batch() {
    init_test_logging();
    let buffer = Arc::new(DataBuffer::new(100));
    let sink = Arc::new(MemorySink::new());
    for record in RecordFixtures::data_point_batch("boiler_temp", 3) {
        buffer.push(record, OverflowPolicy::DiscardOldest).unwrap();
    }
    let drainer = drainer(buffer.clone(), sink.clone(), 0, 10);

    sink.set_failing(true);
    assert!(matches!(
        drainer.drain_once(&CancellationToken::new()).await,
        DrainOutcome::Failed { .. }
    ));
    assert_eq!(buffer.len(), 3);
    assert!(sink.is_empty());

    sink.set_failing(false);
    assert!(matches!(
        drainer.drain_once(&CancellationToken::new()).await,
        DrainOutcome::Published { records: 3 }
    ));
    assert!(buffer.is_empty());
    assert_eq!(values(&sink.records()), vec![0.0, 1.0, 2.0]);
    assert_eq!(drainer.metrics().failures, 1);
}

#[tokio::test]
async fn test_transient_publish_failure_is_retried() {
    init_test_logging();
    let buffer = Arc::new(DataBuffer::new(100));
    let sink = Arc::new(MemorySink::new());
    for record in RecordFixtures::data_point_batch("boiler_temp", 2) {
        buffer.push(record, OverflowPolicy::DiscardOldest).unwrap();
    }
    let drainer = drainer(buffer.clone(), sink.clone(), 2, 10);

    sink.fail_next(1);
    assert!(matches!(
        drainer.drain_once(&CancellationToken::new()).await,
        DrainOutcome::Published { records: 2 }
    ));
    assert_eq!(sink.publish_calls(), 2);
    assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn test_records_evicted_during_publish_are_not_lost_twice() {
    let buffer = Arc::new(DataBuffer::new(3));
    for record in RecordFixtures::data_point_batch("boiler_temp", 3) {
        buffer.push(record, OverflowPolicy::DiscardOldest).unwrap();
    }

    let batch = buffer.peek(2);
    for record in RecordFixtures::data_point_batch("flow_setpoint", 1) {
        buffer.push(record, OverflowPolicy::DiscardOldest).unwrap();
    }

    assert_eq!(buffer.commit(&batch), 1);
    assert_eq!(buffer.len(), 2);
    assert_eq!(values(&buffer.peek(10).records), vec![2.0, 0.0]);
}

#[tokio::test]
async fn test_empty_buffer_drain() {
    let buffer = Arc::new(DataBuffer::new(4));
    let sink = Arc::new(MemorySink::new());
    let drainer = drainer(buffer, sink.clone(), 0, 4);
    assert!(matches!(
        drainer.drain_once(&CancellationToken::new()).await,
        DrainOutcome::Empty
    ));
    assert_eq!(sink.publish_calls(), 0);
}

// =============================================================================
// Through the core
// =============================================================================

#[tokio::test]
async fn test_subscribed_value_reaches_sink() {
    init_test_logging();
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    harness.plc().set_value(TEMP_ADDRESS, Value::Float64(64.5));
    let points = harness.wait_for_data_points("boiler_temp", 1).await;

    let point = points.last().unwrap();
    point.assert_identity(PLC, "boiler_temp");
    point.assert_good_quality();
    point.assert_value_approx(64.5, 1e-9);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_remaining_records() {
    init_test_logging();
    let config = ConfigBuilder::plant()
        .without_subscriptions()
        .drain_interval(Duration::from_secs(3600));
    let harness = TestHarness::start(config).await;

    for record in RecordFixtures::data_point_batch("boiler_temp", 25) {
        harness
            .core
            .buffer()
            .push(record, OverflowPolicy::DiscardOldest)
            .unwrap();
    }
    assert!(harness.delivered().is_empty());

    harness.shutdown().await;

    assert_eq!(harness.delivered_of(RecordKind::DataPoint).len(), 25);
    assert!(harness.core.buffer().is_empty());
    assert!(harness.core.buffer().is_closed());
}
