// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # OPC Client Core Integration Tests
//!
//! Integration suites for the OPC client core plus the shared utilities they
//! are built on. Every suite runs against in-memory simulated servers; no
//! vendor stack or network access is needed.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Server, tag and record fixtures
//!   - `builders`: [`ConfigBuilder`](common::builders::ConfigBuilder) for client configurations
//!   - `assertions`: Assertion helpers for data points and sink output
//!   - `mocks`: `MockProtocolClient`, `RecordingStatusSink`, `FailingAuditLogger`
//!   - `harness`: [`TestHarness`](common::harness::TestHarness), a started core with simulated servers
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p opcc-tests
//!
//! # Run one suite
//! cargo test -p opcc-tests --test integration_connection
//! cargo test -p opcc-tests --test integration_subscription
//! cargo test -p opcc-tests --test integration_write
//! cargo test -p opcc-tests --test integration_buffer
//! cargo test -p opcc-tests --test integration_resilience
//! cargo test -p opcc-tests --test integration_config
//!
//! # With logs
//! RUST_LOG=opcc=debug cargo test -p opcc-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! ### Connection Tests (`integration_connection.rs`)
//! - Connection state machine no-ops
//! - Startup with unreachable servers
//! - Reconnect and staged configuration updates
//!
//! ### Subscription Tests (`integration_subscription.rs`)
//! - Deadband filtering end to end
//! - Item queue overflow
//! - Subscription restore after a lost session
//!
//! ### Write Tests (`integration_write.rs`)
//! - Rate limiting, validation and auditing
//! - Pre-fetch failures on critical writes
//!
//! ### Buffer Tests (`integration_buffer.rs`)
//! - Record round-trip and overflow policies
//! - Drainer delivery and shutdown drain
//!
//! ### Resilience Tests (`integration_resilience.rs`)
//! - Circuit breaker thresholds and half-open trials
//! - Retry budgets
//!
//! ### Config Tests (`integration_config.rs`)
//! - Loading TOML, YAML and JSON files
//! - Validation failures
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use opcc_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::start(ConfigBuilder::plant()).await;
//!     harness.plc().set_value(fixtures::TEMP_ADDRESS, Value::Float64(21.0));
//!     // ...
//!     harness.shutdown().await;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Common imports for test files.
pub mod prelude {
    pub use crate::common::*;
    pub use opcc_client::{OpcClientCore, StartReport};
    pub use opcc_core::status::ConnectionStatus;
    pub use opcc_core::types::{Quality, ServerId, TagId, Value};
    pub use std::sync::Arc;
    pub use std::time::Duration;
    pub use tokio_util::sync::CancellationToken;
}
