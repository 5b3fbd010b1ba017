// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! OS signals (SIGTERM, SIGINT and SIGQUIT on Unix, Ctrl+C elsewhere) cancel
//! a root [`CancellationToken`]. Components take child tokens from
//! [`ShutdownCoordinator::token`] and stop when it fires.
//!
//! # Example
//!
//! ```ignore
//! use opcc_bin::shutdown::ShutdownCoordinator;
//!
//! let coordinator = ShutdownCoordinator::new();
//! let token = coordinator.token();
//!
//! tokio::spawn(async move {
//!     token.cancelled().await;
//!     println!("Shutdown received!");
//! });
//!
//! coordinator.wait_for_shutdown().await;
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Owns the root cancellation token of the process.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    /// Creates a coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child token cancelled on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Initiates shutdown. Idempotent.
    pub fn initiate_shutdown(&self) {
        if !self.root.is_cancelled() {
            info!("Shutdown initiated");
            self.root.cancel();
        }
    }

    /// Returns `true` once shutdown was initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Waits for an OS signal or [`initiate_shutdown`](Self::initiate_shutdown),
    /// whichever comes first, then cancels the root token.
    pub async fn wait_for_shutdown(&self) {
        tokio::select! {
            _ = self.root.cancelled() => {}
            _ = wait_for_signal() => self.initiate_shutdown(),
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint, mut sigquit) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    ) {
        (Ok(term), Ok(int), Ok(quit)) => (term, int, quit),
        (term, int, quit) => {
            let error = [term.err(), int.err(), quit.err()].into_iter().flatten().next();
            warn!(error = ?error, "Failed to register signal handlers, falling back to Ctrl+C");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigquit.recv() => info!("Received SIGQUIT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await
        }
    }
}

// =============================================================================
// ShutdownGuard
// =============================================================================

/// Initiates shutdown when dropped, unless disarmed.
pub struct ShutdownGuard {
    coordinator: ShutdownCoordinator,
    trigger_on_drop: bool,
}

impl ShutdownGuard {
    /// Creates an armed guard.
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            trigger_on_drop: true,
        }
    }

    /// Disarms the guard.
    pub fn disarm(mut self) {
        self.trigger_on_drop = false;
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.trigger_on_drop {
            warn!("ShutdownGuard dropped, initiating shutdown");
            self.coordinator.initiate_shutdown();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
