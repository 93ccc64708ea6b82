//! Contract test: sync trigger pacing
//!
//! Constraints verified:
//! - Event mode ticks exactly when a change signal arrives, never before
//! - Periodic mode ticks on the timer and drains pending change signals
//!   without acting on them
//! - A burst of signals produces a single event-mode tick

mod common;

use std::time::Duration;

use common::*;
use routesync_core::trigger::{SyncMode, SyncTrigger};
use tokio::time::timeout;

#[tokio::test]
async fn event_mode_blocks_until_signalled() {
    let (store, rx) = store_with_defaults();
    let mut trigger = SyncTrigger::new(rx, SyncMode::Event);

    // No change yet: tick must not complete.
    assert!(
        timeout(Duration::from_millis(50), trigger.tick())
            .await
            .is_err(),
        "event tick fired without a change signal"
    );

    store.update(snapshot(&[("10.1.0.0/16", "10.0.0.5")])).await;

    timeout(Duration::from_millis(200), trigger.tick())
        .await
        .expect("change signal must produce a tick");
}

#[tokio::test]
async fn event_mode_collapses_bursts_into_one_tick() {
    let (store, rx) = store_with_defaults();
    let mut trigger = SyncTrigger::new(rx, SyncMode::Event);

    store.update(snapshot(&[("10.1.0.0/16", "10.0.0.5")])).await;
    store.update(snapshot(&[("10.2.0.0/16", "10.0.0.5")])).await;
    store.update(snapshot(&[("10.3.0.0/16", "10.0.0.5")])).await;

    timeout(Duration::from_millis(200), trigger.tick())
        .await
        .expect("burst must produce at least one tick");

    // The burst collapsed; there is no second tick pending.
    assert!(
        timeout(Duration::from_millis(50), trigger.tick())
            .await
            .is_err(),
        "collapsed burst produced more than one tick"
    );
}

#[tokio::test]
async fn periodic_mode_first_tick_is_immediate() {
    let (_store, rx) = store_with_defaults();
    let mut trigger = SyncTrigger::new(rx, SyncMode::Periodic(Duration::from_secs(60)));

    timeout(Duration::from_millis(100), trigger.tick())
        .await
        .expect("first periodic tick must not wait a full interval");
}

#[tokio::test]
async fn periodic_mode_drains_signal_without_acting() {
    let (store, rx) = store_with_defaults();
    let mut trigger = SyncTrigger::new(rx, SyncMode::Periodic(Duration::from_millis(50)));

    // First tick is immediate.
    timeout(Duration::from_millis(100), trigger.tick())
        .await
        .expect("first tick");

    // A change arrives between ticks.
    store.update(snapshot(&[("10.1.0.0/16", "10.0.0.5")])).await;

    // The next tick still comes from the timer, and it consumes the
    // pending signal as a side effect.
    timeout(Duration::from_millis(300), trigger.tick())
        .await
        .expect("periodic tick");

    // Store another identical snapshot: no signal, yet ticks keep coming.
    store.update(snapshot(&[("10.1.0.0/16", "10.0.0.5")])).await;
    timeout(Duration::from_millis(300), trigger.tick())
        .await
        .expect("periodic tick without any pending signal");
}
