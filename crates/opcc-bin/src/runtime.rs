// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client runtime orchestration.
//!
//! The runtime builds an [`OpcClientCore`] from the loaded configuration,
//! starts it, waits for a shutdown signal and then shuts the core down
//! within the configured grace period.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use opcc_client::{OpcClientCore, StartReport};
use opcc_config::{load_config, ClientConfig};
use opcc_core::scheduler::Scheduler;
use opcc_core::sink::LoggingSink;
use tracing::{info, warn};

use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;
use crate::simulate::PlantSimulator;

// =============================================================================
// ClientRuntime
// =============================================================================

/// Runs the client core until shutdown is signaled.
pub struct ClientRuntime {
    config: ClientConfig,
    shutdown: ShutdownCoordinator,
    simulate: Option<Duration>,
}

impl ClientRuntime {
    /// Creates a runtime for `config`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownCoordinator::new(),
            simulate: None,
        }
    }

    /// Runs against simulated servers whose values change every `interval`.
    pub fn with_simulation(mut self, interval: Option<Duration>) -> Self {
        self.simulate = interval;
        self
    }

    /// The shutdown coordinator; triggering it stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Runs until a shutdown signal arrives.
    pub async fn run(self) -> BinResult<()> {
        info!(
            client_id = %self.config.client.id,
            version = opcc_client::VERSION,
            simulate = self.simulate.is_some(),
            "Starting OPC client"
        );

        let grace = self.config.shutdown.grace_period;
        let mut builder = OpcClientCore::builder(self.config.clone()).sink(Arc::new(LoggingSink));

        let mut simulator_task = None;
        if let Some(interval) = self.simulate {
            let (simulator, provider) = PlantSimulator::from_config(&self.config);
            builder = builder.transport_provider(Arc::new(provider));
            simulator_task = Some(Scheduler::spawn(Arc::new(simulator), interval, self.shutdown.token()));
        }

        let core = builder
            .build()
            .map_err(|e| BinError::from(e).with_context("failed to assemble client core"))?;
        let report = core.start().await;
        log_start_report(&report);

        info!("OPC client is ready");
        self.shutdown.wait_for_shutdown().await;

        info!("Shutdown initiated, cleaning up...");
        let disconnect = core.shutdown(grace).await;
        if !disconnect.failed.is_empty() || !disconnect.timed_out.is_empty() {
            warn!(
                failed = disconnect.failed.len(),
                timed_out = disconnect.timed_out.len(),
                "Some servers did not disconnect cleanly"
            );
        }
        if let Some(task) = simulator_task {
            let _ = task.await;
        }

        info!("OPC client shutdown complete");
        Ok(())
    }
}

fn log_start_report(report: &StartReport) {
    for (server_id, error) in &report.connections.failed {
        warn!(server_id = %server_id, error = %error, "Server unavailable at startup, will retry");
    }
    for (server_id, error) in &report.subscription_failures {
        warn!(server_id = %server_id, error = %error, "Configured subscription rejected");
    }
    info!(
        connected = report.connections.connected.len(),
        failed = report.connections.failed.len(),
        disabled = report.connections.disabled.len(),
        subscriptions = report.subscriptions.len(),
        "Startup complete"
    );
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`ClientRuntime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<ClientConfig>,
    simulate: Option<Duration>,
}

impl RuntimeBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from `path`.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Uses `config` directly.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Enables simulation with the given tick interval.
    pub fn simulate(mut self, interval: Option<Duration>) -> Self {
        self.simulate = interval;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<ClientRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::MissingConfig)?;
                load_config(&path)
                    .map_err(|e| BinError::from(e).with_context(format!("failed to load {}", path.display())))?
            }
        };
        Ok(ClientRuntime::new(config).with_simulation(self.simulate))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_config::ServerConnectionConfig;

    #[test]
    fn test_builder_requires_config() {
        let err = RuntimeBuilder::new().build().err().unwrap();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_builder_reports_missing_file() {
        let err = RuntimeBuilder::new()
            .config_path("/nonexistent/opcc.yaml")
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/opcc.yaml"));
    }

    #[tokio::test]
    async fn test_simulated_run_stops_on_shutdown() {
        let mut config = ClientConfig::default();
        config.servers.push(ServerConnectionConfig::new("plc", "ua", "opc.tcp://plc:4840"));
        config.shutdown.grace_period = Duration::from_millis(200);

        let runtime = RuntimeBuilder::new()
            .config(config)
            .simulate(Some(Duration::from_millis(10)))
            .build()
            .unwrap();
        let shutdown = runtime.shutdown_handle();
        let handle = tokio::spawn(runtime.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.initiate_shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
