// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Outbound buffering for the OPC client core.
//!
//! ```text
//! producers ──push──▶ DataBuffer ──peek──▶ BufferDrainer ──publish──▶ OutboundSink
//!                         ▲                      │
//!                         └──────── commit ──────┘ (after success)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod drainer;

pub use buffer::{Batch, BufferStats, DataBuffer, OverflowPolicy, PushOutcome};
pub use drainer::{BufferDrainer, DrainMetrics, DrainOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
