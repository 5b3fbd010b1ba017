// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `opcc`: runs the OPC client core.

use opcc_bin::cli::Cli;
use opcc_bin::error::report_error_and_exit;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    if let Err(e) = opcc_bin::commands::execute(cli).await {
        report_error_and_exit(e);
    }
}
