// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC protocol adapters for the OPC client core.
//!
//! Each OPC variant is an independent adapter implementing
//! [`ProtocolClient`](opcc_core::client::ProtocolClient) over a
//! [`SessionTransport`], the seam where a vendor SDK supplies session and
//! service primitives.
//!
//! # Features
//!
//! - [`UaClient`]: reads, writes, subscriptions, history, alarms, browsing
//! - [`HdaClient`]: history, latest-value reads, browsing
//! - [`AcClient`]: event subscriptions, acknowledgement, browsing
//! - [`ClientFactory`]: adapter selection by protocol variant
//! - [`SimulatedServer`]: in-memory server with failure injection
//!
//! # Status codes
//!
//! ```text
//! StatusCode ──▶ Quality      Good | Uncertain | Bad
//!            └─▶ ClientError  timeout, communication, session/channel closed,
//!                             unknown address, write rejected, bad status
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use opcc_protocol::{ClientFactory, SimulatedTransportProvider};
//!
//! let factory = ClientFactory::new(Arc::new(SimulatedTransportProvider::new()));
//! let client = factory.create(&config)?;
//! client.connect().await?;
//! let values = client.read(&["ns=2;s=Temperature".to_string()]).await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod ac;
pub mod conversion;
pub mod factory;
pub mod hda;
pub mod session;
pub mod simulated;
pub mod transport;
pub mod ua;

pub use ac::AcClient;
pub use conversion::StatusCode;
pub use factory::{ClientFactory, NoTransportProvider, SimulatedTransportProvider, TransportProvider};
pub use hda::HdaClient;
pub use session::{AdapterSession, SessionStats};
pub use simulated::SimulatedServer;
pub use transport::{
    DataValue, EventNotification, HistorySample, MonitoredItemCreateResult, Notification,
    SessionTransport, TransportError, TransportResult,
};
pub use ua::UaClient;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
