// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration files loaded from disk and run through a core.

use opcc_client::{WriteContext, WriteRequest};
use opcc_config::{load_config, load_config_str, ClientConfig, ConfigError, ConfigFormat, RateLimitKey};
use opcc_core::types::DeadbandType;
use opcc_tests::prelude::*;

const PLANT_YAML: &str = r#"
client:
  id: line-1-client

servers:
  - id: plc
    protocol: ua
    endpoint: opc.tcp://plc.line1:4840
  - id: historian
    protocol: hda
    endpoint: opc.hda://historian/Line1
  - id: alarms
    protocol: ac
    endpoint: opc.ae://alarms/Line1

tags:
  - id: boiler_temp
    server_id: plc
    address: "ns=2;s=Line1.Boiler.Temp"
    eu_range:
      low: 0.0
      high: 200.0
  - id: flow_setpoint
    server_id: plc
    address: "ns=2;s=Line1.Flow.Setpoint"
    writable: true

subscriptions:
  - server_id: plc
    publishing_interval: 100ms
    items:
      - tag_id: boiler_temp
        deadband_type: absolute
        deadband_value: 5.0

resilience:
  connection:
    retry:
      max_retries: 0

write:
  rate_limit:
    requests_per_second: 50
    burst_size: 10
    key: user
  validation_rules:
    - tag_id: flow_setpoint
      min: 0
      max: 100

buffer:
  capacity: 500
  drain_interval: 20ms

health:
  interval: 1h

shutdown:
  grace_period: 2s
"#;

const PLANT_TOML: &str = r#"
[client]
id = "line-1-client"

[[servers]]
id = "plc"
protocol = "ua"
endpoint = "opc.tcp://plc.line1:4840"

[[servers]]
id = "historian"
protocol = "hda"
endpoint = "opc.hda://historian/Line1"

[[servers]]
id = "alarms"
protocol = "ac"
endpoint = "opc.ae://alarms/Line1"

[[tags]]
id = "boiler_temp"
server_id = "plc"
address = "ns=2;s=Line1.Boiler.Temp"
eu_range = { low = 0.0, high = 200.0 }

[[tags]]
id = "flow_setpoint"
server_id = "plc"
address = "ns=2;s=Line1.Flow.Setpoint"
writable = true

[[subscriptions]]
server_id = "plc"
publishing_interval = "100ms"

[[subscriptions.items]]
tag_id = "boiler_temp"
deadband_type = "absolute"
deadband_value = 5.0

[resilience.connection.retry]
max_retries = 0

[write.rate_limit]
requests_per_second = 50
burst_size = 10
key = "user"

[[write.validation_rules]]
tag_id = "flow_setpoint"
min = 0
max = 100

[buffer]
capacity = 500
drain_interval = "20ms"

[health]
interval = "1h"

[shutdown]
grace_period = "2s"
"#;

fn as_json(config: &ClientConfig) -> serde_json::Value {
    serde_json::to_value(config).unwrap()
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_yaml_file_loads() {
    let file = temp_config_file(PLANT_YAML, "yaml");
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.client.id, CLIENT_ID);
    assert_eq!(config.servers.len(), 3);
    assert!(config.server_issues().is_empty());
    assert_eq!(config.tags.len(), 2);
    assert_eq!(config.subscriptions[0].publishing_interval, Duration::from_millis(100));

    let item = &config.subscriptions[0].items[0];
    assert_eq!(item.deadband_type, DeadbandType::Absolute);
    assert_eq!(item.deadband_value, 5.0);
    assert!(item.discard_oldest);

    assert_eq!(config.write.rate_limit.key, RateLimitKey::User);
    assert_eq!(config.write.validation_rules[0].max, Some(100.0));
    assert_eq!(config.resilience.connection.retry.max_retries, 0);
    assert_eq!(config.buffer.drain_interval, Duration::from_millis(20));
    assert_eq!(config.health.interval, Duration::from_secs(3600));
}

#[test]
fn test_formats_agree() {
    let yaml = load_config(temp_config_file(PLANT_YAML, "yml").path()).unwrap();
    let toml = load_config(temp_config_file(PLANT_TOML, "toml").path()).unwrap();
    let json_text = serde_json::to_string_pretty(&yaml).unwrap();
    let json = load_config(temp_config_file(&json_text, "json").path()).unwrap();

    assert_eq!(as_json(&yaml), as_json(&toml));
    assert_eq!(as_json(&yaml), as_json(&json));
}

#[test]
fn test_unknown_extension_is_rejected() {
    let file = temp_config_file(PLANT_YAML, "ini");
    let err = load_config(file.path()).unwrap_err();
    assert_eq!(err.error_type(), "unsupported_format");
}

#[test]
fn test_unknown_field_is_a_parse_error() {
    let file = temp_config_file(&format!("{}\nmetrics:\n  port: 9090\n", PLANT_YAML), "yaml");
    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "unexpected error: {}", err);
    assert!(err.to_string().contains(file.path().to_str().unwrap()));
}

#[test]
fn test_missing_file() {
    let err = load_config("/nonexistent/opcc/plant.yaml").unwrap_err();
    assert_eq!(err.error_type(), "file_not_found");
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_duplicate_tag_is_rejected() {
    let mut config = load_config_str(PLANT_YAML, ConfigFormat::Yaml).unwrap();
    config.tags.push(TagFixtures::setpoint());
    match config.validate() {
        Err(ConfigError::DuplicateTagId { tag_id }) => assert_eq!(tag_id, "flow_setpoint"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_subscription_item_must_belong_to_server() {
    let mut config = load_config_str(PLANT_YAML, ConfigFormat::Yaml).unwrap();
    config.tags.push(TagFixtures::historized_temperature());
    config.subscriptions[0]
        .items
        .push(opcc_config::MonitoredItemConfig::new("hist_temp"));

    let err = config.validate().unwrap_err();
    assert_eq!(err.error_type(), "validation");
    assert!(err.to_string().contains("belongs to server 'historian'"));
}

#[test]
fn test_rule_for_unknown_tag_is_rejected() {
    let mut config = load_config_str(PLANT_YAML, ConfigFormat::Yaml).unwrap();
    config.write.validation_rules[0].tag_id = TagId::new("ghost");

    match config.validate() {
        Err(ConfigError::UnknownTag { field, tag_id }) => {
            assert_eq!(field, "write.validation_rules[0].tag_id");
            assert_eq!(tag_id, "ghost");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_percent_deadband_needs_range() {
    let mut config = load_config_str(PLANT_YAML, ConfigFormat::Yaml).unwrap();
    config.tags[0].eu_range = None;
    config.subscriptions[0].items[0].deadband_type = DeadbandType::Percent;

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("requires an eu_range"));
}

#[test]
fn test_zero_capacity_buffer_is_rejected() {
    let mut config = load_config_str(PLANT_YAML, ConfigFormat::Yaml).unwrap();
    config.buffer.capacity = 0;
    match config.validate() {
        Err(ConfigError::Validation { field, .. }) => assert_eq!(field, "buffer.capacity"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_protocol_mismatch_is_a_server_issue_only() {
    let mut config = load_config_str(PLANT_YAML, ConfigFormat::Yaml).unwrap();
    config.servers[1].endpoint = "opc.tcp://historian:4840".into();

    assert!(config.validate().is_ok());
    let issues = config.server_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].0, ServerId::new(HISTORIAN));
}

// =============================================================================
// Running a loaded configuration
// =============================================================================

#[tokio::test]
async fn test_loaded_config_drives_the_core() {
    let file = temp_config_file(PLANT_YAML, "yaml");
    let config = load_config(file.path()).unwrap();
    let harness = TestHarness::start(config).await;

    assert_eq!(harness.report.connections.connected.len(), 3);
    assert_eq!(harness.report.subscriptions.len(), 1);

    for value in [50.0, 52.0, 60.0] {
        harness.plc().set_value(TEMP_ADDRESS, Value::Float64(value));
    }
    let points = harness.wait_for_data_points("boiler_temp", 2).await;
    assert_eq!(numeric_values(&points), vec![50.0, 60.0]);

    let request = WriteRequest::new(PLC, WriteContext::new("operator-7"))
        .with_item("flow_setpoint", Value::Float64(150.0));
    let result = harness
        .core
        .commands()
        .write_tags(&ServerId::new(PLC), request, &harness.cancel)
        .await
        .unwrap();
    result.assert_failure("validation");
    assert_eq!(harness.plc().write_calls(), 0);

    harness.shutdown().await;
}
