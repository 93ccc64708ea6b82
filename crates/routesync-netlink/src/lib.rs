// # Netlink route monitor
//
// Periodically enumerates the kernel's IPv4 routing table over rtnetlink and
// pushes filtered snapshots into the core route table store. Also performs
// the one-off default-route discovery the store's metadata comes from.
//
// Filter contract: keep only IPv4 unicast routes in the main table with
// universe scope that carry both a destination prefix and a gateway.
// Directly-connected routes (no gateway) never reach the cloud.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteScope, RouteType,
};
use rtnetlink::{Handle, RouteMessageBuilder};
use tracing::{debug, warn};

use routesync_core::store::{DefaultRoute, RouteSnapshot, RouteTable};
use routesync_core::{Error, Result};

/// Kernel routing table the agent mirrors.
const RT_TABLE_MAIN: u32 = 254;

/// Open an rtnetlink connection and spawn its IO task.
pub fn connect() -> Result<Handle> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);
    Ok(handle)
}

/// Discover the interface and source IP the kernel uses toward the public
/// Internet, i.e. its main-table default route.
///
/// The source IP prefers the route's own preferred-source attribute and
/// falls back to the first IPv4 address configured on the output interface.
pub async fn discover_default_route(handle: &Handle) -> Result<DefaultRoute> {
    let message = RouteMessageBuilder::<Ipv4Addr>::default().build();
    let mut routes = handle.route().get(message).execute();

    while let Some(route) = routes.try_next().await.map_err(netlink_err)? {
        if route.header.destination_prefix_length != 0 || table_id(&route) != RT_TABLE_MAIN {
            continue;
        }

        debug!(?route, "checking candidate default route");
        let Some(gateway) = gateway(&route) else {
            continue;
        };
        let Some(if_index) = route.attributes.iter().find_map(|attr| match attr {
            RouteAttribute::Oif(index) => Some(*index),
            _ => None,
        }) else {
            continue;
        };

        let source_ip = match preferred_source(&route) {
            Some(ip) => ip,
            None => first_address_on(handle, if_index).await?,
        };
        let interface = interface_name(if_index)?;

        debug!(%interface, %source_ip, %gateway, "default route discovered");
        return Ok(DefaultRoute {
            interface,
            source_ip,
        });
    }

    Err(Error::discovery("no default route with a gateway found"))
}

/// Periodic poller feeding the route table store.
pub struct NetlinkMonitor {
    handle: Handle,
    poll_interval: Duration,
}

impl NetlinkMonitor {
    pub fn new(handle: Handle, poll_interval: Duration) -> Self {
        Self {
            handle,
            poll_interval,
        }
    }

    /// Run the polling loop forever. A failed poll keeps the previous
    /// snapshot; the store only sees complete enumerations.
    pub async fn run(self, store: Arc<RouteTable>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.poll_routes().await {
                Ok(snapshot) => store.update(snapshot).await,
                Err(error) => {
                    warn!(%error, "kernel route poll failed, keeping previous snapshot");
                }
            }
        }
    }

    /// One full enumeration of the kernel's gatewayed IPv4 routes.
    pub async fn poll_routes(&self) -> Result<RouteSnapshot> {
        let message = RouteMessageBuilder::<Ipv4Addr>::default().build();
        let mut routes = self.handle.route().get(message).execute();

        let mut snapshot = RouteSnapshot::new();
        while let Some(route) = routes.try_next().await.map_err(netlink_err)? {
            if let Some((prefix, next_hop)) = gatewayed_route(&route) {
                snapshot.insert(prefix, next_hop);
            }
        }
        Ok(snapshot)
    }
}

/// Apply the monitor filter to one kernel route.
///
/// Returns the `("a.b.c.d/len", gateway)` entry for routes that pass, `None`
/// for everything else.
fn gatewayed_route(route: &RouteMessage) -> Option<(String, Ipv4Addr)> {
    if route.header.kind != RouteType::Unicast
        || route.header.scope != RouteScope::Universe
        || table_id(route) != RT_TABLE_MAIN
    {
        return None;
    }

    let destination = route.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Destination(RouteAddress::Inet(ip)) => Some(*ip),
        _ => None,
    })?;
    let next_hop = gateway(route)?;

    let prefix = format!("{destination}/{}", route.header.destination_prefix_length);
    Some((prefix, next_hop))
}

fn gateway(route: &RouteMessage) -> Option<Ipv4Addr> {
    route.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Gateway(RouteAddress::Inet(ip)) => Some(*ip),
        _ => None,
    })
}

fn preferred_source(route: &RouteMessage) -> Option<Ipv4Addr> {
    route.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::PrefSource(RouteAddress::Inet(ip)) => Some(*ip),
        _ => None,
    })
}

/// Kernel routing table the message belongs to. Tables above 255 arrive as
/// an attribute; the header byte covers the rest.
fn table_id(route: &RouteMessage) -> u32 {
    route
        .attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Table(id) => Some(*id),
            _ => None,
        })
        .unwrap_or(route.header.table as u32)
}

/// First IPv4 address configured on the given interface.
async fn first_address_on(handle: &Handle, if_index: u32) -> Result<Ipv4Addr> {
    let mut addresses = handle.address().get().execute();
    while let Some(message) = addresses.try_next().await.map_err(netlink_err)? {
        if message.header.index != if_index {
            continue;
        }
        let found = message.attributes.iter().find_map(|attr| match attr {
            AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
            _ => None,
        });
        if let Some(ip) = found {
            return Ok(ip);
        }
    }
    Err(Error::discovery(format!(
        "no IPv4 address on interface index {if_index}"
    )))
}

fn interface_name(if_index: u32) -> Result<String> {
    let name = nix::net::if_::if_indextoname(if_index)
        .map_err(|e| Error::discovery(format!("interface index {if_index} has no name: {e}")))?;
    Ok(name.to_string_lossy().into_owned())
}

fn netlink_err(error: rtnetlink::Error) -> Error {
    Error::Io(std::io::Error::other(format!("netlink: {error}")))
}
