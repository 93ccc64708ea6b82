//! Sync trigger
//!
//! The reconciler body is identical in event-driven and periodic operation;
//! only the thing that paces it differs. [`SyncTrigger`] models that pacing
//! as a single tick source owning the store's change-signal receiver:
//!
//! - **Event mode**: a tick is one received change signal.
//! - **Periodic mode**: ticks come from a fixed-interval timer (first tick
//!   immediate); a pending change signal is drained and ignored so that a
//!   later switch of modes never observes stale signals.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Interval};
use tracing::debug;

/// How the reconciler is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Sync only when the store reports a change.
    Event,
    /// Sync on a fixed interval, ignoring change signals.
    Periodic(Duration),
}

/// Tick source driving the reconciler's sync loop.
pub struct SyncTrigger {
    signal_rx: mpsc::Receiver<()>,
    pacing: Pacing,
}

enum Pacing {
    Event,
    Periodic(Interval),
}

impl SyncTrigger {
    pub fn new(signal_rx: mpsc::Receiver<()>, mode: SyncMode) -> Self {
        let pacing = match mode {
            SyncMode::Event => Pacing::Event,
            SyncMode::Periodic(period) => Pacing::Periodic(interval(period)),
        };
        Self { signal_rx, pacing }
    }

    /// Wait for the next sync tick.
    pub async fn tick(&mut self) {
        match &mut self.pacing {
            Pacing::Event => {
                if self.signal_rx.recv().await.is_none() {
                    // Store gone; nothing will ever trigger a sync again.
                    debug!("change signal channel closed, parking trigger");
                    std::future::pending::<()>().await;
                }
            }
            Pacing::Periodic(timer) => {
                timer.tick().await;
                if self.signal_rx.try_recv().is_ok() {
                    debug!("received sync signal in periodic mode, ignoring");
                }
            }
        }
    }
}
