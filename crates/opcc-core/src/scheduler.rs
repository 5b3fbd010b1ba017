// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cooperative periodic tasks.
//!
//! A [`PeriodicTask`] runs on a fixed interval until its cancellation token
//! fires. Runs never overlap: the next tick is only awaited after `run_once`
//! returns, and ticks missed during a slow run are skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Work executed on every scheduler tick.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Task name for logging.
    fn name(&self) -> &str;

    /// Runs one cycle.
    async fn run_once(&self);

    /// Runs once after cancellation, before the task exits.
    async fn on_shutdown(&self) {}
}

/// Spawns periodic tasks on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    /// Spawns `task`, first running one `period` from now.
    pub fn spawn(
        task: Arc<dyn PeriodicTask>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::debug!(task = task.name(), period_ms = period.as_millis() as u64, "Periodic task started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => task.run_once().await,
                }
            }

            task.on_shutdown().await;
            tracing::debug!(task = task.name(), "Periodic task stopped");
        })
    }
}
