//! Contract test: route table store and change signal
//!
//! Constraints verified:
//! - After `update(s)`, `snapshot()` returns `s`
//! - A change signal is emitted iff the new snapshot differs from the prior
//! - The signal is single-slot: bursts of updates collapse into one signal
//! - Defaults captured at construction are visible to readers

mod common;

use std::net::Ipv4Addr;

use common::*;
use tokio::sync::mpsc::error::TryRecvError;

#[tokio::test]
async fn update_then_snapshot_round_trips() {
    let (store, _rx) = store_with_defaults();

    let snap = snapshot(&[("10.1.0.0/16", "10.0.0.5"), ("10.2.0.0/16", "10.0.0.6")]);
    store.update(snap.clone()).await;

    assert_eq!(store.snapshot().await, snap);
}

#[tokio::test]
async fn signal_emitted_only_on_change() {
    let (store, mut rx) = store_with_defaults();

    // Empty -> empty is not a change.
    store.update(snapshot(&[])).await;
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

    let snap = snapshot(&[("192.168.0.0/16", "10.0.0.1")]);
    store.update(snap.clone()).await;
    assert!(rx.try_recv().is_ok(), "first real change must signal");

    // Identical snapshot: no new signal.
    store.update(snap).await;
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

    // Removing the route is a change again.
    store.update(snapshot(&[])).await;
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn signal_collapses_bursts() {
    let (store, mut rx) = store_with_defaults();

    // Three distinct updates with no consumer waiting.
    store.update(snapshot(&[("10.1.0.0/16", "10.0.0.5")])).await;
    store.update(snapshot(&[("10.2.0.0/16", "10.0.0.5")])).await;
    store.update(snapshot(&[("10.3.0.0/16", "10.0.0.5")])).await;

    // Exactly one pending signal; the consumer re-reads the whole map.
    assert!(rx.try_recv().is_ok());
    assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);

    let snap = store.snapshot().await;
    assert!(snap.contains_key("10.3.0.0/16"), "latest snapshot wins");
    assert_eq!(snap.len(), 1);
}

#[tokio::test]
async fn defaults_are_fixed_at_construction() {
    let (store, _rx) = store_with_defaults();

    assert_eq!(store.default_ip(), Some(Ipv4Addr::new(10, 0, 0, 4)));
    assert_eq!(store.default_interface(), Some("eth0"));

    // Updates never touch the discovery metadata.
    store.update(snapshot(&[("10.1.0.0/16", "10.0.0.5")])).await;
    assert_eq!(store.default_ip(), Some(Ipv4Addr::new(10, 0, 0, 4)));
}

#[tokio::test]
async fn missing_defaults_are_not_fatal() {
    let (tx, _rx) = routesync_core::store::change_channel();
    let store = routesync_core::store::RouteTable::new(tx, None);

    assert_eq!(store.default_ip(), None);
    assert_eq!(store.default_interface(), None);
}
