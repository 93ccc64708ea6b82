//! Common utilities for the store/trigger contract tests

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::mpsc;

use routesync_core::store::{change_channel, DefaultRoute, RouteSnapshot, RouteTable};

/// Build a snapshot from `(prefix, next_hop)` pairs.
pub fn snapshot(entries: &[(&str, &str)]) -> RouteSnapshot {
    entries
        .iter()
        .map(|(prefix, next_hop)| {
            (
                prefix.to_string(),
                next_hop.parse::<Ipv4Addr>().expect("valid next hop"),
            )
        })
        .collect()
}

/// A store wired to a fresh change channel, with discovered defaults.
pub fn store_with_defaults() -> (Arc<RouteTable>, mpsc::Receiver<()>) {
    let (tx, rx) = change_channel();
    let table = RouteTable::new(
        tx,
        Some(DefaultRoute {
            interface: "eth0".to_string(),
            source_ip: Ipv4Addr::new(10, 0, 0, 4),
        }),
    );
    (Arc::new(table), rx)
}
