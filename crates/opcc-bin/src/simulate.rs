// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory plant for `run --simulate`.
//!
//! Every configured server gets a [`SimulatedServer`] with one node per tag.
//! [`PlantSimulator`] then random-walks numeric nodes and raises occasional
//! alarms on AC servers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use opcc_config::{ClientConfig, TagDefinition};
use opcc_core::scheduler::PeriodicTask;
use opcc_core::types::{DataType, ProtocolKind, Value};
use opcc_protocol::{SimulatedServer, SimulatedTransportProvider};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Chance per tick that an AC server raises an alarm.
const ALARM_PROBABILITY: f64 = 0.05;

/// Initial value of a node.
fn initial_value(tag: &TagDefinition) -> Value {
    match tag.data_type {
        DataType::Bool => Value::Bool(false),
        DataType::String => Value::String(String::new()),
        DataType::Bytes => Value::Bytes(Vec::new()),
        DataType::DateTime => Value::DateTime(Utc::now()),
        numeric => {
            let midpoint = tag.eu_range.map(|r| (r.low + r.high) / 2.0).unwrap_or(0.0);
            numeric.coerce_f64(tag.to_raw(midpoint))
        }
    }
}

struct SimulatedNode {
    server: Arc<SimulatedServer>,
    tag: TagDefinition,
}

/// A simulated plant built from a configuration.
pub struct PlantSimulator {
    nodes: Vec<SimulatedNode>,
    alarm_servers: Vec<(String, Arc<SimulatedServer>)>,
    rng: Mutex<StdRng>,
    next_event: AtomicU64,
}

impl PlantSimulator {
    /// Builds one simulated server per configured server and the provider
    /// that hands them out.
    pub fn from_config(config: &ClientConfig) -> (Self, SimulatedTransportProvider) {
        let provider = SimulatedTransportProvider::new();
        let mut alarm_servers = Vec::new();

        for server_config in &config.servers {
            let server = Arc::new(SimulatedServer::new(server_config.endpoint.clone()));
            provider.register(server_config.id.clone(), server.clone());
            if matches!(server_config.resolve_protocol("protocol"), Ok(ProtocolKind::Ac)) {
                alarm_servers.push((server_config.id.to_string(), server));
            }
        }

        let nodes = config
            .tags
            .iter()
            .filter_map(|tag| {
                let server = provider.get(&tag.server_id)?;
                server.add_node(None, tag.address.clone(), initial_value(tag), tag.writable);
                Some(SimulatedNode {
                    server,
                    tag: tag.clone(),
                })
            })
            .collect::<Vec<_>>();

        info!(
            servers = config.servers.len(),
            nodes = nodes.len(),
            "Simulated plant ready"
        );

        let simulator = Self {
            nodes,
            alarm_servers,
            rng: Mutex::new(StdRng::from_entropy()),
            next_event: AtomicU64::new(1),
        };
        (simulator, provider)
    }

    /// Moves every numeric node and maybe raises alarms.
    ///
    /// Returns the number of value changes.
    pub fn step(&self) -> usize {
        let mut rng = self.rng.lock();
        let mut changed = 0;

        for node in &self.nodes {
            if !node.tag.data_type.is_numeric() {
                continue;
            }
            let Some(current) = node.server.value(&node.tag.address).and_then(|v| v.as_f64()) else {
                continue;
            };
            let engineering = node.tag.to_engineering(current);
            let span = node.tag.eu_range.map(|r| r.high - r.low).unwrap_or(10.0);
            let mut next = engineering + rng.gen_range(-0.02..=0.02) * span;
            if let Some(range) = node.tag.eu_range {
                next = next.clamp(range.low, range.high);
            }
            let raw = node.tag.data_type.coerce_f64(node.tag.to_raw(next));
            node.server.set_value(&node.tag.address, raw);
            changed += 1;
        }

        for (server_id, server) in &self.alarm_servers {
            if rng.gen_bool(ALARM_PROBABILITY) {
                let n = self.next_event.fetch_add(1, Ordering::Relaxed);
                let severity = rng.gen_range(100..=900);
                server.raise_alarm(format!("sim-{}", n), server_id.clone(), "Simulated alarm", severity);
                debug!(server_id = %server_id, event = n, severity, "Simulated alarm raised");
            }
        }
        changed
    }
}

#[async_trait]
impl PeriodicTask for PlantSimulator {
    fn name(&self) -> &str {
        "plant-simulator"
    }

    async fn run_once(&self) {
        let changed = self.step();
        debug!(changed, "Simulated values updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_config::ServerConnectionConfig;
    use opcc_core::types::EuRange;

    fn config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.servers = vec![
            ServerConnectionConfig::new("plc", "ua", "opc.tcp://plc:4840"),
            ServerConnectionConfig::new("alarms", "ac", "opc.ae://alarms"),
        ];
        let mut level = TagDefinition::new("level", "plc", "ns=2;s=Level");
        level.data_type = DataType::Int16;
        level.scale = 0.1;
        level.eu_range = Some(EuRange::new(0.0, 100.0));
        config.tags = vec![
            level,
            TagDefinition {
                data_type: DataType::Bool,
                ..TagDefinition::new("running", "plc", "ns=2;s=Running")
            },
        ];
        config
    }

    #[test]
    fn test_nodes_follow_tags() {
        let (simulator, provider) = PlantSimulator::from_config(&config());
        let plc = provider.get(&"plc".into()).unwrap();
        assert_eq!(plc.value("ns=2;s=Level"), Some(Value::Int16(500)));
        assert_eq!(plc.value("ns=2;s=Running"), Some(Value::Bool(false)));
        assert_eq!(simulator.alarm_servers.len(), 1);
    }

    #[test]
    fn test_step_stays_in_range() {
        let (simulator, provider) = PlantSimulator::from_config(&config());
        let plc = provider.get(&"plc".into()).unwrap();
        for _ in 0..200 {
            assert_eq!(simulator.step(), 1);
        }
        match plc.value("ns=2;s=Level") {
            Some(Value::Int16(raw)) => assert!((0..=1000).contains(&raw)),
            other => panic!("unexpected value {:?}", other),
        }
    }
}
