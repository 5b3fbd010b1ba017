// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcc-bin
//!
//! Command-line runtime for the OPC client core.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────┐
//!                    │   main.rs   │
//!                    └──────┬──────┘
//!                    ┌──────▼──────┐
//!                    │   cli.rs    │
//!                    └──────┬──────┘
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!                    ┌─────┴──────┐
//!                    ▼            ▼
//!              ┌──────────┐ ┌──────────┐
//!              │ shutdown │ │ simulate │
//!              └──────────┘ └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run with the default config (opcc.yaml)
//! opcc
//!
//! # Run against in-memory simulated servers
//! opcc -c plant.toml run --simulate
//!
//! # Validate a configuration file
//! opcc -c plant.yaml validate --show-config --format json
//!
//! # Show versions
//! opcc version
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;
pub mod simulate;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{ClientRuntime, RuntimeBuilder};
pub use shutdown::{ShutdownCoordinator, ShutdownGuard};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
