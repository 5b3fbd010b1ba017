// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built servers, tags and records shared by the integration suites.
//!
//! The reference plant is one OPC UA line controller (`plc`), one historian
//! (`historian`, HDA) and one alarm server (`alarms`, AC).

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use opcc_config::{ServerConnectionConfig, TagDefinition};
use opcc_core::sink::OutboundRecord;
use opcc_core::types::{
    AckState, AlarmEvent, DataPoint, DataType, EuRange, Quality, ServerId, TagId, Value,
};
use opcc_protocol::SimulatedServer;

/// Server id of the line controller.
pub const PLC: &str = "plc";
/// Server id of the historian.
pub const HISTORIAN: &str = "historian";
/// Server id of the alarm server.
pub const ALARMS: &str = "alarms";

/// Boiler temperature, read-only.
pub const TEMP_ADDRESS: &str = "ns=2;s=Line1.Boiler.Temp";
/// Flow setpoint, writable, limited to 100.
pub const SETPOINT_ADDRESS: &str = "ns=2;s=Line1.Flow.Setpoint";
/// Feed valve, writable and critical.
pub const VALVE_ADDRESS: &str = "ns=2;s=Line1.Feed.Valve";

/// Client id used by every fixture configuration.
pub const CLIENT_ID: &str = "line-1-client";

// =============================================================================
// Servers
// =============================================================================

/// Server configurations.
pub struct ServerFixtures;

impl ServerFixtures {
    /// The OPC UA line controller.
    pub fn plc() -> ServerConnectionConfig {
        ServerConnectionConfig::new(PLC, "ua", "opc.tcp://plc.line1:4840")
    }

    /// The HDA historian.
    pub fn historian() -> ServerConnectionConfig {
        ServerConnectionConfig::new(HISTORIAN, "hda", "opc.hda://historian/Line1")
    }

    /// The AC alarm server.
    pub fn alarms() -> ServerConnectionConfig {
        ServerConnectionConfig::new(ALARMS, "ac", "opc.ae://alarms/Line1")
    }

    /// A UA server under an arbitrary id.
    pub fn ua(id: &str) -> ServerConnectionConfig {
        ServerConnectionConfig::new(id, "ua", format!("opc.tcp://{}:4840", id))
    }
}

/// Simulated servers matching [`ServerFixtures`].
pub struct SimulatedFixtures;

impl SimulatedFixtures {
    /// Line controller with the temperature, setpoint and valve nodes.
    pub fn plc() -> Arc<SimulatedServer> {
        Arc::new(
            SimulatedServer::new(ServerFixtures::plc().endpoint)
                .with_node(TEMP_ADDRESS, Value::Float64(20.0), false)
                .with_node(SETPOINT_ADDRESS, Value::Float64(10.0), true)
                .with_node(VALVE_ADDRESS, Value::Float64(0.0), true),
        )
    }

    /// Historian with hourly temperature samples for `hours` hours.
    pub fn historian(hours: u32) -> Arc<SimulatedServer> {
        let server = Arc::new(
            SimulatedServer::new(ServerFixtures::historian().endpoint)
                .with_node(TEMP_ADDRESS, Value::Float64(20.0), false),
        );
        for hour in 0..hours {
            server.add_history(
                TEMP_ADDRESS,
                RecordFixtures::base_time() + chrono::Duration::hours(i64::from(hour)),
                Value::Float64(20.0 + f64::from(hour)),
            );
        }
        server
    }

    /// Alarm server without any active event.
    pub fn alarms() -> Arc<SimulatedServer> {
        Arc::new(SimulatedServer::new(ServerFixtures::alarms().endpoint))
    }

    /// A server that refuses every connection.
    pub fn unreachable(endpoint: &str) -> Arc<SimulatedServer> {
        let server = Arc::new(SimulatedServer::new(endpoint));
        server.set_reachable(false);
        server
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tag definitions for the reference plant.
pub struct TagFixtures;

impl TagFixtures {
    /// Boiler temperature on the line controller.
    pub fn temperature() -> TagDefinition {
        let mut tag = TagDefinition::new("boiler_temp", PLC, TEMP_ADDRESS);
        tag.eu_range = Some(EuRange::new(0.0, 200.0));
        tag
    }

    /// Writable flow setpoint.
    pub fn setpoint() -> TagDefinition {
        let mut tag = TagDefinition::new("flow_setpoint", PLC, SETPOINT_ADDRESS);
        tag.writable = true;
        tag
    }

    /// Writable, critical feed valve position.
    pub fn valve() -> TagDefinition {
        let mut tag = TagDefinition::new("feed_valve", PLC, VALVE_ADDRESS);
        tag.writable = true;
        tag.critical = true;
        tag.eu_range = Some(EuRange::new(0.0, 100.0));
        tag
    }

    /// Historized temperature on the historian.
    pub fn historized_temperature() -> TagDefinition {
        TagDefinition::new("hist_temp", HISTORIAN, TEMP_ADDRESS)
    }

    /// A scaled 16-bit tag: raw counts times 0.1.
    pub fn scaled_level(server_id: &str, address: &str) -> TagDefinition {
        let mut tag = TagDefinition::new("tank_level", server_id, address);
        tag.data_type = DataType::Int16;
        tag.scale = 0.1;
        tag
    }

    /// Every tag of the reference plant.
    pub fn plant() -> Vec<TagDefinition> {
        vec![
            Self::temperature(),
            Self::setpoint(),
            Self::valve(),
            Self::historized_temperature(),
        ]
    }
}

// =============================================================================
// Records
// =============================================================================

/// Data points and outbound records.
pub struct RecordFixtures;

impl RecordFixtures {
    /// Fixed time used by history and round-trip tests.
    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// A good data point at a fixed timestamp.
    pub fn data_point(tag: &str, value: Value) -> DataPoint {
        DataPoint::new(ServerId::new(PLC), TagId::new(tag), value, Quality::Good)
            .with_timestamp(Self::base_time())
            .with_source_timestamp(Some(Self::base_time() - chrono::Duration::milliseconds(250)))
    }

    /// A batch of `count` good data points, values `0..count`.
    pub fn data_point_batch(tag: &str, count: usize) -> Vec<OutboundRecord> {
        (0..count)
            .map(|i| OutboundRecord::data_point(CLIENT_ID, Self::data_point(tag, Value::Float64(i as f64))))
            .collect()
    }

    /// An unacknowledged alarm.
    pub fn alarm(event_id: &str, severity: u16) -> AlarmEvent {
        AlarmEvent {
            server_id: ServerId::new(ALARMS),
            event_id: event_id.to_string(),
            source_id: "Line1.Boiler".to_string(),
            message: "Boiler temperature high".to_string(),
            severity,
            ack_state: AckState::Unacknowledged,
            timestamp: Self::base_time(),
        }
    }
}
