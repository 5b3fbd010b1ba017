// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection, subscription, write and health management for the OPC
//! client core.
//!
//! # Modules
//!
//! - [`connection`]: per-server connection state machine
//! - [`manager`]: parallel initialization, recovery and shutdown of all
//!   connections
//! - [`subscription`]: subscriptions, monitored items, deadband filtering
//!   and notification queues
//! - [`write`]: the rate limit, validate, pre-fetch, write and audit pipeline
//! - [`health`]: periodic health snapshots
//! - [`service`]: inbound commands
//! - [`client`]: [`OpcClientCore`], which wires everything together

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod health;
pub mod manager;
pub mod service;
pub mod subscription;
pub mod tags;
pub mod write;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionSnapshot, ServerConnection, StatusChange, StatusSink, TracingStatusSink, Transition};
pub use client::{OpcClientCore, OpcClientCoreBuilder, StartReport};
pub use health::{overall_status, ClientHealthMonitor};
pub use manager::{ClientEventHandler, ConnectionManager, DisconnectReport, InitializationReport};
pub use service::{AckContext, CommandError, CommandResult, CommandService, HistoricalQuery};
pub use subscription::{SubscriptionError, SubscriptionManager, SubscriptionRegistry};
pub use tags::TagRegistry;
pub use write::{
    CriticalWriteAuditor, ItemOutcome, WriteContext, WriteFailure, WritePipeline, WriteRequest, WriteResult,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
