// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcc-core
//!
//! Core abstractions shared by every crate of the OPC client core:
//!
//! - **Types**: `ServerId`, `TagId`, `Value`, `DataPoint`, `AlarmEvent`, deadbands
//! - **Error**: the `ClientError` taxonomy and its transient classification
//! - **Client**: the `ProtocolClient` trait implemented by the UA/HDA/AC adapters
//! - **Resilience**: retry strategies, lock-free circuit breakers and the three
//!   resilience profiles built from them
//! - **Scheduler**: cooperative periodic tasks with cancellation
//! - **Sink**: outbound records with routing metadata
//! - **Status / Audit**: health snapshots and critical-write records
//!
//! ## Example
//!
//! ```rust,ignore
//! use opcc_core::resilience::{ResilienceConfig, ResiliencePolicies};
//! use tokio_util::sync::CancellationToken;
//!
//! let policies = ResiliencePolicies::from_config(&ResilienceConfig::default());
//! let cancel = CancellationToken::new();
//! let values = policies
//!     .server_communication
//!     .execute("plant-ua", &cancel, || client.read(&addresses))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod types;

// =============================================================================
// Client & Resilience Modules
// =============================================================================

pub mod circuit_breaker;
pub mod client;
pub mod resilience;
pub mod retry;
pub mod scheduler;

// =============================================================================
// Outbound Modules
// =============================================================================

pub mod audit;
pub mod sink;
pub mod status;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use error::*;
pub use types::*;

pub use audit::{AuditError, AuditLogger, AuditedItem, CriticalWriteLog, InMemoryAuditLogger, TracingAuditLogger};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitError, CircuitState,
};
pub use client::{
    BrowseEntry, Capabilities, ClientEvent, HistoryQuery, HistoryValue, MonitoredItemRequest,
    MonitoredItemResult, ProtocolClient, ReadValue, SubscriptionParams, WriteItem,
};
pub use resilience::{PolicyProfile, PolicySettings, ResilienceConfig, ResiliencePolicies, ResiliencePolicy};
pub use retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};
pub use scheduler::{PeriodicTask, Scheduler};
pub use sink::{LoggingSink, MemorySink, OutboundPayload, OutboundRecord, OutboundSink, RecordKind, RoutingMetadata, Severity};
pub use status::{
    ClientHealthStatus, ConnectionStatus, OverallStatus, ResourceMetrics, ServerHealth,
    SubscriptionStatus, SubscriptionStatusReport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
