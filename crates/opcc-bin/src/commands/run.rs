// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use opcc_config::load_config;
use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::error::{BinError, BinResult};
use crate::logging::init_logging;
use crate::runtime::RuntimeBuilder;

/// Loads the configuration, initializes logging and runs the client core.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    let config = load_config(&cli.config)
        .map_err(|e| BinError::from(e).with_context(format!("failed to load {}", cli.config.display())))?;

    init_logging(
        cli.effective_log_level(config.logging.level.as_str()),
        cli.effective_log_format(config.logging.format),
    )?;
    info!(config = %cli.config.display(), "Configuration loaded");

    RuntimeBuilder::new()
        .config(config)
        .simulate(args.simulate.then_some(args.simulate_interval))
        .build()?
        .run()
        .await
}
