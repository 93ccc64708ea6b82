// # Azure route table reconciler
//
// Drives an Azure route table toward the kernel's routing table through the
// ARM REST API. Azure is the one provider without a per-route diff: the
// whole desired route set is submitted in a single CreateOrUpdate and ARM
// converges the server side.
//
// Ownership: the agent manages exactly one route table, with the fixed name
// `cloudroutesync-route-table`, in the configured resource group.

use std::env;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use routesync_core::cidr::{CidrCache, Ipv4Cidr};
use routesync_core::store::{RouteSnapshot, RouteTable};
use routesync_core::traits::CloudReconciler;
use routesync_core::trigger::SyncTrigger;
use routesync_core::{Error, Result};

const ARM_BASE: &str = "https://management.azure.com";
const ARM_API_VERSION: &str = "2020-06-01";
const TOKEN_URL: &str = "https://login.microsoftonline.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Sentinel prefix shared by every object the agent owns.
const NAME_PREFIX: &str = "cloudroutesync-";

const DEFAULT_SUBSCRIPTION: &str = "1aebf65e-be71-4dac-8755-1a58f16dd74d";
const DEFAULT_RESOURCE_GROUP: &str = "example-resources";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefixes Azure special-cases; never programmed into a route table.
const AZURE_RESERVED: [Ipv4Cidr; 5] = [
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(224, 0, 0, 0), 4),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(255, 255, 255, 255), 32),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(127, 0, 0, 0), 8),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(169, 254, 0, 0), 16),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(168, 63, 129, 16), 32),
];

// ============================================================================
// ARM wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct VirtualNetwork {
    name: String,
    location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Subnet {
    name: String,
    id: String,
    properties: SubnetProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    address_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    route_table: Option<SubResource>,
    /// Remaining subnet configuration, round-tripped untouched so the
    /// association PUT does not strip it.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubResource {
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouteTableResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    properties: RouteTableProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RouteTableProperties {
    #[serde(default)]
    routes: Vec<RouteResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RouteResource {
    name: String,
    properties: RouteProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteProperties {
    address_prefix: String,
    next_hop_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_hop_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct ArmToken {
    access_token: String,
    expires_at: Instant,
}

// ============================================================================
// Reconciler
// ============================================================================

/// Azure implementation of [`CloudReconciler`].
pub struct AzureReconciler {
    http: reqwest::Client,
    subscription_id: String,
    resource_group: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    token: Option<ArmToken>,
    cidrs: CidrCache,
    // Discovered once, then fixed.
    vnet_name: Option<String>,
    location: Option<String>,
    subnet: Option<Subnet>,
    route_table: Option<RouteTableResource>,
}

impl AzureReconciler {
    /// Build a reconciler from the ambient environment.
    ///
    /// `AZURE_SUBSCRIPTION_ID` / `AZURE_RESOURCE_GROUP` fall back to baked-in
    /// defaults; the service-principal variables are required.
    pub fn new() -> Result<Self> {
        let subscription_id =
            env::var("AZURE_SUBSCRIPTION_ID").unwrap_or_else(|_| DEFAULT_SUBSCRIPTION.to_string());
        let resource_group =
            env::var("AZURE_RESOURCE_GROUP").unwrap_or_else(|_| DEFAULT_RESOURCE_GROUP.to_string());

        let tenant_id = require_env("AZURE_TENANT_ID")?;
        let client_id = require_env("AZURE_CLIENT_ID")?;
        let client_secret = require_env("AZURE_CLIENT_SECRET")?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::cloud_api(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            subscription_id,
            resource_group,
            tenant_id,
            client_id,
            client_secret,
            token: None,
            cidrs: CidrCache::new(),
            vnet_name: None,
            location: None,
            subnet: None,
            route_table: None,
        })
    }

    fn route_table_name() -> String {
        format!("{NAME_PREFIX}route-table")
    }

    fn network_url(&self, suffix: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/{suffix}?api-version={ARM_API_VERSION}",
            self.subscription_id, self.resource_group,
        )
    }

    /// A bearer token for ARM, refreshed shortly before expiry.
    async fn bearer(&mut self) -> Result<String> {
        if let Some(token) = &self.token {
            if token.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(token.access_token.clone());
            }
        }

        let url = format!("{TOKEN_URL}/{}/oauth2/v2.0/token", self.tenant_id);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", ARM_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| Error::auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::auth(format!(
                "token request rejected with status {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::auth(format!("malformed token response: {e}")))?;

        let access_token = token.access_token.clone();
        self.token = Some(ArmToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    /// Find the subnet whose CIDR contains the instance's default source IP.
    async fn lookup_subnet(&mut self, default_ip: Ipv4Addr) -> Result<()> {
        let bearer = self.bearer().await?;

        let url = self.network_url("virtualNetworks");
        let vnets: ListResult<VirtualNetwork> =
            get_json(&self.http, &url, &bearer, "list virtual networks").await?;

        for vnet in vnets.value {
            debug!(vnet = %vnet.name, "checking virtual network");

            let url = self.network_url(&format!("virtualNetworks/{}/subnets", vnet.name));
            let subnets: ListResult<Subnet> =
                get_json(&self.http, &url, &bearer, "list subnets").await?;

            for subnet in subnets.value {
                let Some(prefix) = subnet.properties.address_prefix.as_deref() else {
                    continue;
                };
                let cidr = match self.cidrs.parse(prefix) {
                    Ok(cidr) => cidr,
                    Err(error) => {
                        warn!(%prefix, %error, "skipping subnet with unparsable prefix");
                        continue;
                    }
                };
                if cidr.contains(default_ip) {
                    info!(vnet = %vnet.name, subnet = %subnet.name, %cidr, "local subnet found");
                    self.vnet_name = Some(vnet.name);
                    self.location = Some(vnet.location);
                    self.subnet = Some(subnet);
                    return Ok(());
                }
            }
        }

        Err(Error::discovery(format!(
            "no subnet in resource group {} contains {default_ip}",
            self.resource_group
        )))
    }

    fn subnet_cidr(&mut self) -> Option<Ipv4Cidr> {
        let prefix = self.subnet.as_ref()?.properties.address_prefix.clone()?;
        self.cidrs.parse(&prefix).ok()
    }

    async fn get_route_table(&mut self) -> Result<Option<RouteTableResource>> {
        let bearer = self.bearer().await?;
        let url = self.network_url(&format!("routeTables/{}", Self::route_table_name()));

        let response = self
            .http
            .get(&url)
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(|e| Error::cloud_api(format!("get route table: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status("get route table", response).await?;
        let table = response
            .json()
            .await
            .map_err(|e| Error::cloud_api(format!("malformed route table response: {e}")))?;
        Ok(Some(table))
    }

    /// CreateOrUpdate with the full desired route list.
    async fn put_route_table(&mut self, routes: Vec<RouteResource>) -> Result<()> {
        let body = RouteTableResource {
            id: self.route_table.as_ref().and_then(|rt| rt.id.clone()),
            location: self.location.clone(),
            properties: RouteTableProperties { routes },
        };

        let bearer = self.bearer().await?;
        let url = self.network_url(&format!("routeTables/{}", Self::route_table_name()));

        let response = self
            .http
            .put(&url)
            .bearer_auth(&bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::cloud_api(format!("update route table: {e}")))?;
        check_status("update route table", response).await?;
        Ok(())
    }

    /// Point the local subnet at the owned route table, if it is not already.
    async fn associate_subnet(&mut self) -> Result<()> {
        let table_id = self
            .route_table
            .as_ref()
            .and_then(|rt| rt.id.clone())
            .ok_or_else(|| Error::cloud_api("route table has no resource ID yet"))?;

        let subnet = {
            let subnet = self
                .subnet
                .as_mut()
                .ok_or_else(|| Error::discovery("no local subnet discovered"))?;

            if let Some(existing) = &subnet.properties.route_table {
                if existing.id == table_id {
                    debug!("route table already associated, nothing to do");
                    return Ok(());
                }
            }
            subnet.properties.route_table = Some(SubResource {
                id: table_id.clone(),
            });
            subnet.clone()
        };

        let vnet = self
            .vnet_name
            .clone()
            .ok_or_else(|| Error::discovery("no virtual network discovered"))?;

        info!(subnet = %subnet.name, "associating route table with subnet");
        let bearer = self.bearer().await?;
        let url = self.network_url(&format!("virtualNetworks/{vnet}/subnets/{}", subnet.name));

        let response = self
            .http
            .put(&url)
            .bearer_auth(&bearer)
            .json(&subnet)
            .send()
            .await
            .map_err(|e| Error::cloud_api(format!("associate subnet: {e}")))?;
        check_status("associate subnet", response).await?;
        Ok(())
    }

    /// Make sure the owned route table exists. CreateOrUpdate creates it on
    /// the first submission of an (empty) desired set.
    async fn ensure_route_table(&mut self) -> Result<()> {
        match self.get_route_table().await? {
            Some(table) => {
                debug!("route table already exists");
                self.route_table = Some(table);
            }
            None => {
                info!("route table does not exist, creating it");
                self.put_route_table(Vec::new()).await?;
                self.route_table = self.get_route_table().await?;
            }
        }
        self.associate_subnet().await
    }

    async fn sync_route_table(&mut self, store: &RouteTable) -> Result<()> {
        info!("syncing Azure route table");

        let snapshot = store.snapshot().await;
        let subnet_cidr = self.subnet_cidr();
        let routes = build_routes(&snapshot, store.default_ip(), subnet_cidr, &mut self.cidrs);

        self.put_route_table(routes).await?;
        // Refresh the local view so the next cycle sees the post-state.
        self.route_table = self.get_route_table().await?;
        self.associate_subnet().await
    }
}

/// Map a store snapshot onto Azure route resources.
///
/// Reserved destinations are dropped; next hops outside the local subnet are
/// rewritten to the instance's default source IP (next-hop-self) so the
/// fabric forwards through this VM, while next hops inside the subnet are
/// reachable directly and kept as-is.
fn build_routes(
    snapshot: &RouteSnapshot,
    default_ip: Option<Ipv4Addr>,
    subnet_cidr: Option<Ipv4Cidr>,
    cidrs: &mut CidrCache,
) -> Vec<RouteResource> {
    let mut results = Vec::new();

    for (prefix, next_hop) in snapshot {
        let cidr = match cidrs.parse(prefix) {
            Ok(cidr) => cidr,
            Err(error) => {
                warn!(%prefix, %error, "skipping unparsable kernel prefix");
                continue;
            }
        };
        if AZURE_RESERVED.iter().any(|r| r.contains(cidr.address())) {
            debug!(%prefix, "destination in Azure reserved ranges, skipping");
            continue;
        }

        let mut next_hop = *next_hop;
        if let Some(subnet) = subnet_cidr {
            if !subnet.contains(next_hop) {
                match default_ip {
                    Some(self_ip) => next_hop = self_ip,
                    None => {
                        warn!(%prefix, %next_hop, "next hop outside subnet but no default IP known, skipping");
                        continue;
                    }
                }
            }
        }

        results.push(RouteResource {
            name: prefix.replacen('/', "_", 1),
            properties: RouteProperties {
                address_prefix: prefix.clone(),
                next_hop_type: "VirtualAppliance".to_string(),
                next_hop_ip_address: Some(next_hop.to_string()),
            },
        });
    }

    results
}

#[async_trait]
impl CloudReconciler for AzureReconciler {
    fn provider_name(&self) -> &'static str {
        "azure"
    }

    async fn reconcile(&mut self, store: Arc<RouteTable>, mut trigger: SyncTrigger) -> Result<()> {
        let default_ip = store
            .default_ip()
            .ok_or_else(|| Error::discovery("no default source IP discovered on this instance"))?;

        self.lookup_subnet(default_ip).await?;
        self.ensure_route_table().await?;

        loop {
            trigger.tick().await;
            if let Err(error) = self.sync_route_table(&store).await {
                warn!(%error, "failed to sync route table");
            }
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        info!("Azure cleanup is not implemented; the route table is left in place");
        Ok(())
    }
}

// ============================================================================
// HTTP helpers
// ============================================================================

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::auth(format!("{name} is not set")))
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    bearer: &str,
    context: &str,
) -> Result<T> {
    let response = http
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| Error::cloud_api(format!("{context}: {e}")))?;
    let response = check_status(context, response).await?;
    response
        .json()
        .await
        .map_err(|e| Error::cloud_api(format!("{context}: malformed response: {e}")))
}

async fn check_status(context: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error response".to_string());

    match status.as_u16() {
        401 | 403 => Err(Error::auth(format!("{context}: {status}: {body}"))),
        _ => Err(Error::cloud_api(format!("{context}: {status}: {body}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> RouteSnapshot {
        entries
            .iter()
            .map(|(p, n)| (p.to_string(), n.parse().unwrap()))
            .collect()
    }

    #[test]
    fn next_hop_self_for_hops_outside_subnet() {
        let snap = snapshot(&[
            ("10.1.0.0/16", "10.5.0.5"),
            ("10.2.0.0/16", "10.5.0.6"),
        ]);
        let subnet = "10.0.0.0/24".parse().unwrap();
        let default_ip = Ipv4Addr::new(10, 0, 0, 4);
        let mut cidrs = CidrCache::new();

        let mut routes = build_routes(&snap, Some(default_ip), Some(subnet), &mut cidrs);
        routes.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].name, "10.1.0.0_16");
        assert_eq!(routes[1].name, "10.2.0.0_16");
        for route in &routes {
            assert_eq!(
                route.properties.next_hop_ip_address.as_deref(),
                Some("10.0.0.4")
            );
            assert_eq!(route.properties.next_hop_type, "VirtualAppliance");
        }
        assert_eq!(routes[0].properties.address_prefix, "10.1.0.0/16");
        assert_eq!(routes[1].properties.address_prefix, "10.2.0.0/16");
    }

    #[test]
    fn next_hop_inside_subnet_is_kept() {
        let snap = snapshot(&[("10.1.0.0/16", "10.0.0.5")]);
        let subnet = "10.0.0.0/24".parse().unwrap();
        let mut cidrs = CidrCache::new();

        let routes = build_routes(
            &snap,
            Some(Ipv4Addr::new(10, 0, 0, 4)),
            Some(subnet),
            &mut cidrs,
        );

        assert_eq!(routes.len(), 1);
        assert_eq!(
            routes[0].properties.next_hop_ip_address.as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn reserved_destinations_are_dropped() {
        let snap = snapshot(&[
            ("169.254.169.254/32", "10.0.0.1"),
            ("168.63.129.16/32", "10.0.0.1"),
            ("224.0.0.0/4", "10.0.0.1"),
            ("127.0.0.0/8", "10.0.0.1"),
            ("255.255.255.255/32", "10.0.0.1"),
        ]);
        let mut cidrs = CidrCache::new();

        let routes = build_routes(
            &snap,
            Some(Ipv4Addr::new(10, 0, 0, 4)),
            Some("10.0.0.0/24".parse().unwrap()),
            &mut cidrs,
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn unparsable_prefixes_are_skipped_not_fatal() {
        let mut snap = snapshot(&[("10.1.0.0/16", "10.5.0.5")]);
        snap.insert("garbage".to_string(), Ipv4Addr::new(10, 0, 0, 1));
        let mut cidrs = CidrCache::new();

        let routes = build_routes(
            &snap,
            Some(Ipv4Addr::new(10, 0, 0, 4)),
            Some("10.0.0.0/24".parse().unwrap()),
            &mut cidrs,
        );
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].properties.address_prefix, "10.1.0.0/16");
    }

    #[test]
    fn route_table_body_serializes_to_arm_shape() {
        let body = RouteTableResource {
            id: None,
            location: Some("westeurope".to_string()),
            properties: RouteTableProperties {
                routes: vec![RouteResource {
                    name: "10.1.0.0_16".to_string(),
                    properties: RouteProperties {
                        address_prefix: "10.1.0.0/16".to_string(),
                        next_hop_type: "VirtualAppliance".to_string(),
                        next_hop_ip_address: Some("10.0.0.4".to_string()),
                    },
                }],
            },
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["location"], "westeurope");
        let route = &json["properties"]["routes"][0];
        assert_eq!(route["name"], "10.1.0.0_16");
        assert_eq!(route["properties"]["addressPrefix"], "10.1.0.0/16");
        assert_eq!(route["properties"]["nextHopType"], "VirtualAppliance");
        assert_eq!(route["properties"]["nextHopIpAddress"], "10.0.0.4");
    }

    #[test]
    fn subnet_round_trip_preserves_unknown_properties() {
        let raw = serde_json::json!({
            "name": "default",
            "id": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Network/virtualNetworks/v/subnets/default",
            "properties": {
                "addressPrefix": "10.0.0.0/24",
                "networkSecurityGroup": { "id": "/nsg" },
            }
        });

        let mut subnet: Subnet = serde_json::from_value(raw).unwrap();
        subnet.properties.route_table = Some(SubResource {
            id: "/route-table".to_string(),
        });

        let out = serde_json::to_value(&subnet).unwrap();
        assert_eq!(out["properties"]["addressPrefix"], "10.0.0.0/24");
        assert_eq!(out["properties"]["routeTable"]["id"], "/route-table");
        assert_eq!(out["properties"]["networkSecurityGroup"]["id"], "/nsg");
    }
}
