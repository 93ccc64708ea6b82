//! In-memory route table store
//!
//! Holds the latest snapshot of the kernel's gatewayed IPv4 routes plus the
//! discovery metadata (default interface and source IP) captured once at
//! startup. One writer (the netlink monitor), many readers (the reconciler
//! and diagnostics). Readers get copies; they never hold the lock for longer
//! than one clone of the map.
//!
//! Every accepted update emits a change signal. The signal is a single-slot,
//! level-triggered notification: if the consumer is not waiting, it is
//! dropped, and consumers always re-read the whole map rather than the
//! signal payload.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// One monitor tick's worth of kernel routes: prefix string -> next hop.
pub type RouteSnapshot = HashMap<String, Ipv4Addr>;

/// Default-route metadata discovered once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    /// Interface the kernel uses to reach the public Internet.
    pub interface: String,
    /// Source IP the kernel would use on that interface.
    pub source_ip: Ipv4Addr,
}

/// Create the change-signal channel shared by a store and its consumer.
///
/// Capacity 1 makes the signal collapsible by construction: any number of
/// updates between two receives appear as one.
pub fn change_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

/// Thread-safe snapshot of the observed kernel route table.
#[derive(Debug)]
pub struct RouteTable {
    routes: RwLock<RouteSnapshot>,
    signal_tx: mpsc::Sender<()>,
    default_route: Option<DefaultRoute>,
}

impl RouteTable {
    /// Create a new store.
    ///
    /// `default_route` is the result of the startup route-get toward a
    /// well-known external address; `None` means discovery failed, which is
    /// not fatal (the caller logs a warning) but leaves providers that need
    /// next-hop-self without a rewrite target.
    pub fn new(signal_tx: mpsc::Sender<()>, default_route: Option<DefaultRoute>) -> Self {
        Self {
            routes: RwLock::new(RouteSnapshot::new()),
            signal_tx,
            default_route,
        }
    }

    /// Replace the stored snapshot iff it differs from the current one.
    ///
    /// On replacement, the change signal is emitted non-blockingly; if the
    /// slot is already full the signal is dropped.
    pub async fn update(&self, snapshot: RouteSnapshot) {
        {
            let mut routes = self.routes.write().await;
            if *routes == snapshot {
                return;
            }
            *routes = snapshot;

            for (prefix, next_hop) in routes.iter() {
                debug!(%prefix, %next_hop, "kernel route");
            }
        }

        // Level trigger: a full slot already tells the consumer to re-read.
        let _ = self.signal_tx.try_send(());
    }

    /// A stable copy of the current snapshot, safe to iterate while the
    /// monitor keeps writing.
    pub async fn snapshot(&self) -> RouteSnapshot {
        self.routes.read().await.clone()
    }

    /// The source IP on the default interface, if discovered.
    pub fn default_ip(&self) -> Option<Ipv4Addr> {
        self.default_route.as_ref().map(|d| d.source_ip)
    }

    /// The default interface name, if discovered.
    pub fn default_interface(&self) -> Option<&str> {
        self.default_route.as_ref().map(|d| d.interface.as_str())
    }
}
