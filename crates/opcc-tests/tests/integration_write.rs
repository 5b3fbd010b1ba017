// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Write Pipeline Integration Tests
//!
//! Writes go through the command surface of a started core against the
//! simulated line controller.
//!
//! - `test_rate_limit_*`: token bucket rejection
//! - `test_validation_*`: range, type and ownership checks
//! - `test_critical_*`: pre-fetch and auditing
//! - `test_write_*`: plain writes and unavailable servers

use opcc_client::{WriteContext, WriteRequest, WriteResult};
use opcc_core::audit::AuditedItem;
use opcc_core::sink::{OutboundPayload, RecordKind};
use opcc_tests::prelude::*;

fn request(tag: &str, value: f64) -> WriteRequest {
    WriteRequest::new(PLC, WriteContext::new("operator-7").with_reason("shift adjustment"))
        .with_item(tag, Value::Float64(value))
}

async fn write(harness: &TestHarness, request: WriteRequest) -> WriteResult {
    harness
        .core
        .commands()
        .write_tags(&ServerId::new(PLC), request, &harness.cancel)
        .await
        .expect("write command failed")
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_without_device_access() {
    let harness = TestHarness::start(ConfigBuilder::plant().write_burst(1)).await;

    write(&harness, request("flow_setpoint", 20.0)).await.assert_success();
    assert_eq!(harness.plc().write_calls(), 1);

    let limited = write(&harness, request("flow_setpoint", 30.0)).await;
    limited.assert_failure("rate_limited");
    assert!(limited.items.is_empty());
    assert_eq!(harness.plc().write_calls(), 1);
    assert_eq!(harness.plc().value(SETPOINT_ADDRESS), Some(Value::Float64(20.0)));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_is_per_user() {
    let harness = TestHarness::start(ConfigBuilder::plant().write_burst(1)).await;

    write(&harness, request("flow_setpoint", 20.0)).await.assert_success();
    let other = WriteRequest::new(PLC, WriteContext::new("operator-8"))
        .with_item("flow_setpoint", Value::Float64(25.0));
    write(&harness, other).await.assert_success();
    assert_eq!(harness.plc().write_calls(), 2);

    harness.shutdown().await;
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_validation_non_critical_write_within_rule() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    let result = write(&harness, request("flow_setpoint", 42.0)).await;
    result.assert_success();
    assert!(!result.critical);
    assert!(!result.audited);
    assert_eq!(result.items[0].old_value, None);
    assert_eq!(harness.plc().value(SETPOINT_ADDRESS), Some(Value::Float64(42.0)));

    harness.core.writes().auditor().wait_idle().await;
    assert!(harness.audit.entries().is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_validation_rejects_out_of_range_value() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    let result = write(&harness, request("flow_setpoint", 150.0)).await;
    result.assert_failure("validation");
    assert!(result.to_string().contains("above maximum"));
    assert_eq!(harness.plc().write_calls(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_validation_reports_every_issue() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    let request = WriteRequest::new(PLC, WriteContext::new("operator-7"))
        .with_item("boiler_temp", Value::Float64(80.0))
        .with_item("flow_setpoint", Value::String("fast".to_string()))
        .with_item("hist_temp", Value::Float64(1.0))
        .with_item("no_such_tag", Value::Float64(1.0));
    let result = write(&harness, request).await;

    match result.failure {
        Some(opcc_client::WriteFailure::Validation { issues }) => assert_eq!(issues.len(), 4),
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert_eq!(harness.plc().write_calls(), 0);

    harness.shutdown().await;
}

// =============================================================================
// Critical Writes
// =============================================================================

#[tokio::test]
async fn test_critical_write_is_audited_with_old_and_new_values() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    let result = write(&harness, request("feed_valve", 35.0)).await;
    result.assert_success();
    assert!(result.critical);
    assert!(result.audited);
    assert_eq!(result.items[0].old_value, Some(Value::Float64(0.0)));

    harness.core.writes().auditor().wait_idle().await;
    let entries = harness.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request_id, result.request_id);
    assert_eq!(entries[0].user_id, "operator-7");
    assert_eq!(entries[0].reason.as_deref(), Some("shift adjustment"));
    assert!(entries[0].success);
    assert_eq!(
        entries[0].items,
        vec![AuditedItem {
            tag_id: TagId::new("feed_valve"),
            old_value: Some(Value::Float64(0.0)),
            new_value: Value::Float64(35.0),
            success: true,
            error: None,
        }]
    );

    let record = harness.wait_for_record(RecordKind::CriticalWrite).await;
    match record.payload {
        OutboundPayload::CriticalWrite(log) => assert_eq!(log.request_id, result.request_id),
        other => panic!("unexpected payload {:?}", other),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_critical_write_survives_failed_prefetch() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;
    harness.plc().fail_next_reads(1);

    let result = write(&harness, request("feed_valve", 60.0)).await;
    result.assert_success();
    assert_eq!(result.items[0].old_value, None);
    assert_eq!(harness.plc().read_calls(), 1);
    assert_eq!(harness.plc().value(VALVE_ADDRESS), Some(Value::Float64(60.0)));

    harness.core.writes().auditor().wait_idle().await;
    let entries = harness.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].items[0].old_value, None);
    assert_eq!(entries[0].items[0].new_value, Value::Float64(60.0));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_critical_flag_forces_audit() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;

    let result = write(&harness, request("flow_setpoint", 12.0).critical()).await;
    result.assert_success();
    assert!(result.audited);
    assert_eq!(result.items[0].old_value, Some(Value::Float64(10.0)));

    harness.core.writes().auditor().wait_idle().await;
    assert_eq!(harness.audit.entries().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_critical_audit_failure_does_not_fail_write() {
    let logger = Arc::new(FailingAuditLogger::new());
    let harness = TestHarness::builder(ConfigBuilder::plant())
        .audit_logger(logger.clone())
        .start()
        .await;

    let result = write(&harness, request("feed_valve", 10.0)).await;
    result.assert_success();
    assert!(result.audited);

    let auditor = harness.core.writes().auditor();
    auditor.wait_idle().await;
    assert_eq!(logger.attempts(), 1);
    assert_eq!(auditor.metrics().failed, 1);
    assert_eq!(auditor.metrics().logged, 0);

    harness.shutdown().await;
}

// =============================================================================
// Plain Writes
// =============================================================================

#[tokio::test]
async fn test_write_to_lost_server_is_unavailable() {
    let harness = TestHarness::start(ConfigBuilder::plant()).await;
    harness.plc().drop_session();
    assert!(wait_until(DEFAULT_WAIT, || harness.status(PLC) == ConnectionStatus::Error).await);

    let result = write(&harness, request("flow_setpoint", 42.0)).await;
    result.assert_failure("server_unavailable");
    assert_eq!(harness.plc().write_calls(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_write_scaled_tag_is_unscaled_for_device() {
    const LEVEL: &str = "ns=2;s=Line1.Tank.Level";
    let plc = SimulatedFixtures::plc();
    plc.add_node(None, LEVEL, Value::Int16(0), true);

    let mut level = TagFixtures::scaled_level(PLC, LEVEL);
    level.writable = true;
    let config = ConfigBuilder::new().server(ServerFixtures::plc()).tag(level);
    let harness = TestHarness::builder(config).server(PLC, plc).start().await;

    write(&harness, request("tank_level", 42.5)).await.assert_success();
    assert_eq!(harness.plc().value(LEVEL), Some(Value::Int16(425)));

    harness.shutdown().await;
}
