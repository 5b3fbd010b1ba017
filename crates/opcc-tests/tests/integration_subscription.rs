// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Subscription Integration Tests
//!
//! Notifications travel from a simulated server through the adapter, the
//! connection event pump, the subscription registry and the buffer to the
//! sink.
//!
//! - `test_deadband_*`: client-side deadband filtering
//! - `test_queue_*`: per-item queue overflow
//! - `test_alarm_*`: alarm forwarding and acknowledgement
//! - `test_subscription_*`: subscription lifecycle and status

use opcc_client::subscription::ItemQueue;
use opcc_client::AckContext;
use opcc_config::{MonitoredItemConfig, SubscriptionConfig};
use opcc_core::sink::{OutboundPayload, RecordKind, Severity};
use opcc_core::status::SubscriptionStatus;
use opcc_core::types::{AckState, DeadbandType, EuRange};
use opcc_tests::prelude::*;

fn temperature_with_deadband(kind: DeadbandType, value: f64) -> ConfigBuilder {
    ConfigBuilder::new()
        .server(ServerFixtures::plc())
        .tag(TagFixtures::temperature())
        .subscription(
            SubscriptionConfig::new(PLC)
                .with_item(MonitoredItemConfig::new("boiler_temp").with_deadband(kind, value)),
        )
}

// =============================================================================
// Deadband
// =============================================================================

#[tokio::test]
async fn test_deadband_absolute_reports_first_and_large_changes() {
    let harness = TestHarness::start(temperature_with_deadband(DeadbandType::Absolute, 5.0)).await;

    for value in [10.0, 12.0, 20.0] {
        harness.plc().set_value(TEMP_ADDRESS, Value::Float64(value));
    }

    let points = harness.wait_for_data_points("boiler_temp", 2).await;
    assert_eq!(numeric_values(&points), vec![10.0, 20.0]);
    for point in &points {
        point.assert_identity(PLC, "boiler_temp");
        point.assert_good_quality();
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_deadband_percent_uses_eu_range() {
    // 10% of 0..200 is 20.
    let harness = TestHarness::start(temperature_with_deadband(DeadbandType::Percent, 10.0)).await;

    for value in [100.0, 110.0, 119.0, 125.0] {
        harness.plc().set_value(TEMP_ADDRESS, Value::Float64(value));
    }

    let points = harness.wait_for_data_points("boiler_temp", 2).await;
    assert_eq!(numeric_values(&points), vec![100.0, 125.0]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_deadband_none_reports_every_change() {
    let harness = TestHarness::start(temperature_with_deadband(DeadbandType::None, 0.0)).await;

    for value in [10.0, 10.5, 11.0] {
        harness.plc().set_value(TEMP_ADDRESS, Value::Float64(value));
    }

    let points = harness.wait_for_data_points("boiler_temp", 3).await;
    assert_eq!(numeric_values(&points), vec![10.0, 10.5, 11.0]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_notifications_are_scaled() {
    const LEVEL: &str = "ns=2;s=Line1.Tank.Level";
    let plc = SimulatedFixtures::plc();
    plc.add_node(None, LEVEL, Value::Int16(0), false);

    let config = ConfigBuilder::new()
        .server(ServerFixtures::plc())
        .tag(TagFixtures::scaled_level(PLC, LEVEL))
        .subscription(SubscriptionConfig::new(PLC).with_item(MonitoredItemConfig::new("tank_level")));
    let harness = TestHarness::builder(config).server(PLC, plc).start().await;

    harness.plc().set_value(LEVEL, Value::Int16(500));

    let points = harness.wait_for_data_points("tank_level", 1).await;
    points[0].assert_value_approx(50.0, 1e-9);
    assert!(points[0].source_timestamp.is_some());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_deadband_percent_applies_to_scaled_values() {
    const LEVEL: &str = "ns=2;s=Line1.Tank.Level";
    let plc = SimulatedFixtures::plc();
    plc.add_node(None, LEVEL, Value::Int16(0), false);

    // 10% of 0..200 is 20 engineering units, i.e. 200 raw counts
    let mut level = TagFixtures::scaled_level(PLC, LEVEL);
    level.eu_range = Some(EuRange::new(0.0, 200.0));
    let config = ConfigBuilder::new()
        .server(ServerFixtures::plc())
        .tag(level)
        .subscription(
            SubscriptionConfig::new(PLC).with_item(
                MonitoredItemConfig::new("tank_level").with_deadband(DeadbandType::Percent, 10.0),
            ),
        );
    let harness = TestHarness::builder(config).server(PLC, plc).start().await;

    for raw in [1000, 1100, 1150, 1250] {
        harness.plc().set_value(LEVEL, Value::Int16(raw));
    }

    let points = harness.wait_for_data_points("tank_level", 2).await;
    let values = numeric_values(&points);
    assert_eq!(values.len(), 2, "reported {:?}", values);
    assert!((values[0] - 100.0).abs() < 1e-9);
    assert!((values[1] - 125.0).abs() < 1e-9);

    harness.shutdown().await;
}

// =============================================================================
// Item Queue
// =============================================================================

#[test]
fn test_queue_discard_oldest_keeps_newest() {
    let mut queue = ItemQueue::new(3, true);
    let dropped: Vec<_> = (1..=5).filter_map(|i| queue.push(i)).collect();

    assert_eq!(dropped, vec![1, 2]);
    assert_eq!(queue.dropped(), 2);
    assert_eq!(queue.drain(), vec![3, 4, 5]);
}

#[test]
fn test_queue_discard_newest_keeps_oldest() {
    let mut queue = ItemQueue::new(3, false);
    let dropped: Vec<_> = (1..=5).filter_map(|i| queue.push(i)).collect();

    assert_eq!(dropped, vec![4, 5]);
    assert_eq!(queue.drain(), vec![1, 2, 3]);
    assert!(queue.is_empty());
}

// =============================================================================
// Alarms
// =============================================================================

#[tokio::test]
async fn test_alarm_is_forwarded_and_acknowledged() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;
    let alarms = harness.server(ALARMS).clone();

    assert!(alarms.raise_alarm("evt-1", "Line1.Boiler", "Boiler temperature high", 850));

    let record = harness.wait_for_record(RecordKind::Alarm).await;
    assert_eq!(record.routing.server_id, Some(ServerId::new(ALARMS)));
    assert_eq!(record.routing.severity, Severity::from_event_severity(850));
    match &record.payload {
        OutboundPayload::Alarm(event) => {
            assert_eq!(event.event_id, "evt-1");
            assert_eq!(event.source_id, "Line1.Boiler");
            assert_eq!(event.ack_state, AckState::Unacknowledged);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    let context = AckContext {
        user_id: "operator-7".to_string(),
        comment: "checked on site".to_string(),
    };
    harness
        .core
        .commands()
        .acknowledge_alarm(&ServerId::new(ALARMS), "evt-1", &context, &harness.cancel)
        .await
        .unwrap();

    assert_eq!(alarms.event_state("evt-1"), Some(AckState::Acknowledged));
    assert_eq!(alarms.ack_calls(), 1);

    harness.shutdown().await;
}

// =============================================================================
// Lifecycle and Status
// =============================================================================

#[tokio::test]
async fn test_subscription_create_and_remove_through_commands() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;
    let commands = harness.core.commands();
    let plc = ServerId::new(PLC);

    let id = commands
        .create_subscription(
            &plc,
            SubscriptionConfig::new(PLC).with_item(MonitoredItemConfig::new("flow_setpoint")),
            &harness.cancel,
        )
        .await
        .unwrap();
    assert_eq!(harness.plc().subscription_count(), 2);
    assert_eq!(harness.core.subscriptions().len(), 2);

    harness.plc().set_value(SETPOINT_ADDRESS, Value::Float64(42.0));
    let points = harness.wait_for_data_points("flow_setpoint", 1).await;
    points[0].assert_value(&Value::Float64(42.0));

    commands.remove_subscription(id, &harness.cancel).await.unwrap();
    assert_eq!(harness.plc().subscription_count(), 1);
    assert_eq!(harness.core.subscriptions().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_subscription_status_per_server() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    let statuses = harness.core.subscriptions().statuses();
    let historian = statuses
        .iter()
        .find(|r| r.server_id.as_str() == HISTORIAN)
        .unwrap();
    assert_eq!(historian.status, SubscriptionStatus::NoConfig);
    assert!(historian.subscription_id.is_none());

    let plc = statuses.iter().find(|r| r.server_id.as_str() == PLC).unwrap();
    assert_ne!(plc.status, SubscriptionStatus::NoConfig);
    assert_eq!(plc.monitored_items, 1);

    harness.plc().drop_session();
    assert!(wait_until(DEFAULT_WAIT, || harness.status(PLC) == ConnectionStatus::Error).await);
    let plc = harness
        .core
        .subscriptions()
        .statuses()
        .into_iter()
        .find(|r| r.server_id.as_str() == PLC)
        .unwrap();
    assert_ne!(plc.status, SubscriptionStatus::Active);

    harness.shutdown().await;
}
