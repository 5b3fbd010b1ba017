// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Prints component versions.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("opcc - OPC client core");
    println!();
    println!("Version Information:");
    println!("  opcc-bin:      {}", crate::VERSION);
    println!("  opcc-core:     {}", opcc_core::VERSION);
    println!("  opcc-config:   {}", opcc_config::VERSION);
    println!("  opcc-protocol: {}", opcc_protocol::VERSION);
    println!("  opcc-buffer:   {}", opcc_buffer::VERSION);
    println!("  opcc-client:   {}", opcc_client::VERSION);
    println!();
    println!("Protocols: OPC UA, OPC HDA, OPC AC");
    println!("Target:    {} / {}", std::env::consts::ARCH, std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
