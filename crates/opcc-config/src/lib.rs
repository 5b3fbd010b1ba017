// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcc-config
//!
//! Configuration management for the OPC client core.
//!
//! ## Features
//!
//! - **Schema Definition**: servers, tags, subscriptions, resilience, write
//!   pipeline, buffer, health, shutdown and logging sections
//! - **Multi-Format Support**: YAML, TOML and JSON files
//! - **Environment Overrides**: `${VAR:default}` placeholders and `OPCC_*` variables
//! - **Validation**: duplicate ids, dangling references and deadband/EU-range
//!   consistency; per-server protocol and endpoint checks
//!
//! ## Quick Start
//!
//! ```no_run
//! use opcc_config::loader::load_config;
//!
//! let config = load_config("opcc.yaml").unwrap();
//! println!("Client ID: {}", config.client.id);
//! println!("Servers: {}", config.servers.len());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader, ConfigLoaderBuilder};
pub use schema::{
    BufferConfig, ClientConfig, ClientSection, Credentials, Endpoint, HealthConfig, LogFormat,
    LogLevel, LoggingConfig, MonitoredItemConfig, RateLimitConfig, RateLimitKey, Secret,
    SecurityMode, SecurityPolicy, ServerConnectionConfig, ShutdownConfig, SubscriptionConfig,
    SubscriptionDefaults, TagDefinition, ValidationRule, WriteConfig,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
