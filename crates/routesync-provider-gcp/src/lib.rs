// # GCP route reconciler
//
// Mirrors the kernel routing table into a VPC's top-level route objects via
// the Compute REST API. There is no route-table object on GCP; ownership is
// carried by the `cloudroutesync-` name prefix on each route.
//
// GCP constraint: instance interfaces carry a /32 mask and the gateway only
// answers ARP for its own address, so the kernel cannot install recursive
// routes toward neighbors in the local subnet. Entries whose next hop lies
// inside the local subnet are therefore skipped entirely; everything else is
// programmed with next-hop-self (the instance's own internal IP).
//
// Compute mutations return long-running operations; each sync cycle awaits
// its outstanding operations in parallel before returning.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use serde::Deserialize;
use tracing::{debug, info, warn};

use routesync_core::cidr::{CidrCache, Ipv4Cidr};
use routesync_core::store::{RouteSnapshot, RouteTable};
use routesync_core::traits::CloudReconciler;
use routesync_core::trigger::SyncTrigger;
use routesync_core::{Error, Result};

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";
const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";

/// Sentinel prefix marking routes the agent owns.
const NAME_PREFIX: &str = "cloudroutesync-";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

const OP_CHECK_PERIOD: Duration = Duration::from_secs(2);
const OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefixes GCP special-cases; never programmed as routes.
const GCP_RESERVED: [Ipv4Cidr; 7] = [
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(199, 36, 153, 4), 30),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(199, 36, 153, 8), 30),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(0, 0, 0, 0), 8),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(127, 0, 0, 0), 8),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(169, 254, 0, 0), 16),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(224, 0, 0, 0), 4),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(255, 255, 255, 255), 32),
];

// ============================================================================
// Compute wire types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpRoute {
    name: String,
    dest_range: String,
    network: String,
    next_hop_ip: String,
}

impl GcpRoute {
    /// The tuple that identifies "same route to same next hop". The name is
    /// derived, so it takes no part in equality.
    fn key(&self) -> (&str, &str, &str) {
        (&self.network, &self.next_hop_ip, &self.dest_range)
    }
}

#[derive(Debug, Deserialize)]
struct RouteList {
    #[serde(default)]
    items: Vec<GcpRoute>,
}

#[derive(Debug, Clone, Deserialize)]
struct Operation {
    name: String,
    status: String,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OperationError {
    #[serde(default)]
    errors: Vec<OperationErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OperationErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
struct NetworkInterface {
    name: String,
    network: String,
    #[serde(rename = "networkIP")]
    network_ip: String,
    subnetwork: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subnetwork {
    ip_cidr_range: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct GcpToken {
    access_token: String,
    expires_at: Instant,
}

// ============================================================================
// Reconciler
// ============================================================================

/// GCP implementation of [`CloudReconciler`].
pub struct GcpReconciler {
    http: reqwest::Client,
    project_id: String,
    zone: String,
    region: String,
    instance_id: String,
    internal_ip: String,
    token: Option<GcpToken>,
    cidrs: CidrCache,
    // Discovered once, then fixed.
    network: Option<String>,
    subnet: Option<Ipv4Cidr>,
}

impl GcpReconciler {
    /// Build a reconciler from the instance metadata service.
    pub async fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::cloud_api(format!("failed to build HTTP client: {e}")))?;

        let project_id = fetch_metadata(&http, "project/project-id").await?;
        let zone_path = fetch_metadata(&http, "instance/zone").await?;
        let instance_id = fetch_metadata(&http, "instance/id").await?;
        let internal_ip = fetch_metadata(&http, "instance/network-interfaces/0/ip").await?;

        let zone = zone_name(&zone_path);
        let region = region_of(&zone);

        debug!(%project_id, %zone, %region, %instance_id, %internal_ip, "GCP client built");
        Ok(Self {
            http,
            project_id,
            zone,
            region,
            instance_id,
            internal_ip,
            token: None,
            cidrs: CidrCache::new(),
            network: None,
            subnet: None,
        })
    }

    /// An access token for the Compute API from the instance's default
    /// service account, refreshed shortly before expiry.
    async fn bearer(&mut self) -> Result<String> {
        if let Some(token) = &self.token {
            if token.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(token.access_token.clone());
            }
        }

        let url = format!("{METADATA_BASE}/instance/service-accounts/default/token");
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::auth(format!(
                "token request rejected with status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::auth(format!("malformed token response: {e}")))?;

        let access_token = token.access_token.clone();
        self.token = Some(GcpToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    /// Find the NIC matching the metadata internal IP and record its network
    /// URL and subnet CIDR.
    async fn lookup_network(&mut self) -> Result<()> {
        let bearer = self.bearer().await?;

        let url = format!(
            "{COMPUTE_BASE}/projects/{}/zones/{}/instances/{}",
            self.project_id, self.zone, self.instance_id
        );
        let instance: Instance = get_json(&self.http, &url, &bearer, "get instance").await?;

        for nic in instance.network_interfaces {
            debug!(nic = %nic.name, "checking NIC");
            if nic.network_ip != self.internal_ip {
                continue;
            }

            let subnet_url = if nic.subnetwork.starts_with("http") {
                nic.subnetwork.clone()
            } else {
                format!(
                    "{COMPUTE_BASE}/projects/{}/regions/{}/subnetworks/{}",
                    self.project_id, self.region, nic.subnetwork
                )
            };
            let subnetwork: Subnetwork =
                get_json(&self.http, &subnet_url, &bearer, "get subnetwork").await?;

            let subnet = self.cidrs.parse(&subnetwork.ip_cidr_range).map_err(|e| {
                Error::discovery(format!(
                    "unparsable subnet CIDR {:?}: {e}",
                    subnetwork.ip_cidr_range
                ))
            })?;

            info!(network = %nic.network, %subnet, "local network found");
            self.network = Some(nic.network);
            self.subnet = Some(subnet);
            return Ok(());
        }

        Err(Error::discovery(format!(
            "no NIC matches internal IP {}",
            self.internal_ip
        )))
    }

    /// Routes the agent owns, i.e. those carrying the sentinel name prefix.
    async fn fetch_owned_routes(&mut self) -> Result<Vec<GcpRoute>> {
        let bearer = self.bearer().await?;
        let url = format!("{COMPUTE_BASE}/projects/{}/global/routes", self.project_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&bearer)
            .query(&[("filter", format!("name eq \"{NAME_PREFIX}.*\""))])
            .send()
            .await
            .map_err(|e| Error::cloud_api(format!("list routes: {e}")))?;
        let response = check_status("list routes", response).await?;
        let list: RouteList = response
            .json()
            .await
            .map_err(|e| Error::cloud_api(format!("malformed route list: {e}")))?;

        // The server-side filter is advisory; the ownership predicate is
        // enforced here so nothing unowned ever enters a delete set.
        Ok(list
            .items
            .into_iter()
            .filter(|route| route.name.starts_with(NAME_PREFIX))
            .collect())
    }

    async fn sync_route_table(&mut self, store: &RouteTable) -> Result<()> {
        info!("syncing GCP routes");

        let network = self
            .network
            .clone()
            .ok_or_else(|| Error::discovery("no network discovered"))?;
        let subnet = self
            .subnet
            .ok_or_else(|| Error::discovery("no subnet discovered"))?;

        let current = self.fetch_owned_routes().await?;
        debug!(count = current.len(), "current owned routes");

        let snapshot = store.snapshot().await;
        let desired = build_routes(
            &snapshot,
            subnet,
            &network,
            &self.internal_ip,
            &mut self.cidrs,
        );
        debug!(count = desired.len(), "desired routes");

        let (to_add, to_delete) = diff_routes(&desired, &current);
        if to_add.is_empty() && to_delete.is_empty() {
            debug!("route set already converged");
            return Ok(());
        }

        let bearer = self.bearer().await?;
        let this = &*self;

        let mut tasks: Vec<BoxFuture<'_, Result<Operation>>> = Vec::new();
        for route in &to_delete {
            let bearer = bearer.clone();
            let name = route.name.clone();
            tasks.push(Box::pin(async move {
                info!(route = %name, "deleting route");
                delete_route(&this.http, &this.project_id, &bearer, &name).await
            }));
        }
        for route in &to_add {
            let bearer = bearer.clone();
            tasks.push(Box::pin(async move {
                info!(route = %route.name, dest = %route.dest_range, "adding route");
                insert_route(&this.http, &this.project_id, &bearer, route).await
            }));
        }

        let mut operations = Vec::new();
        for result in join_all(tasks).await {
            match result {
                Ok(op) => operations.push(op),
                Err(error) => warn!(%error, "failed to initiate route operation"),
            }
        }

        this.wait_for_ops(&bearer, operations).await;
        Ok(())
    }

    /// Await all outstanding operations in parallel; failures are logged,
    /// never retried within the cycle.
    async fn wait_for_ops(&self, bearer: &str, operations: Vec<Operation>) {
        let waiters = operations.into_iter().map(|op| async move {
            let name = op.name.clone();
            if let Err(error) =
                wait_for_op(&self.http, &self.project_id, bearer, op).await
            {
                warn!(operation = %name, %error, "operation failed");
            }
        });
        join_all(waiters).await;
        debug!("all operations completed");
    }
}

/// Map a store snapshot onto GCP route objects.
fn build_routes(
    snapshot: &RouteSnapshot,
    subnet: Ipv4Cidr,
    network: &str,
    instance_ip: &str,
    cidrs: &mut CidrCache,
) -> Vec<GcpRoute> {
    let mut results = Vec::new();

    for (prefix, next_hop) in snapshot {
        let cidr = match cidrs.parse(prefix) {
            Ok(cidr) => cidr,
            Err(error) => {
                warn!(%prefix, %error, "skipping unparsable kernel prefix");
                continue;
            }
        };
        if GCP_RESERVED.iter().any(|r| r.contains(cidr.address())) {
            debug!(%prefix, "destination in GCP reserved ranges, skipping");
            continue;
        }
        // Next hops in the local subnet are unreachable through the fabric
        // (see module docs); skip rather than program a broken route.
        if subnet.contains(*next_hop) {
            debug!(%prefix, %next_hop, "next hop inside local subnet, skipping");
            continue;
        }

        results.push(GcpRoute {
            name: route_name(prefix, &next_hop.to_string()),
            dest_range: prefix.clone(),
            network: network.to_string(),
            next_hop_ip: instance_ip.to_string(),
        });
    }

    results
}

/// Derive the idempotent route name: `cloudroutesync-` + slugged prefix and
/// original next hop. Must match `[a-z][-a-z0-9]*`.
fn route_name(prefix: &str, next_hop: &str) -> String {
    format!("{NAME_PREFIX}{}{}", slug(prefix), slug(next_hop))
}

fn slug(s: &str) -> String {
    s.replacen('/', "slash", 1).replace('.', "-")
}

/// Set difference in both directions under the provider equality tuple.
fn diff_routes<'a>(
    desired: &'a [GcpRoute],
    current: &'a [GcpRoute],
) -> (Vec<&'a GcpRoute>, Vec<&'a GcpRoute>) {
    let current_keys: HashSet<_> = current.iter().map(GcpRoute::key).collect();
    let desired_keys: HashSet<_> = desired.iter().map(GcpRoute::key).collect();

    let to_add = desired
        .iter()
        .filter(|route| !current_keys.contains(&route.key()))
        .collect();
    let to_delete = current
        .iter()
        .filter(|route| !desired_keys.contains(&route.key()))
        .collect();
    (to_add, to_delete)
}

/// Outcome of a polled operation: `None` while still running, otherwise the
/// terminal result with a combined error message on failure.
fn operation_outcome(op: &Operation) -> Option<Result<()>> {
    if op.status != "DONE" {
        return None;
    }
    match &op.error {
        Some(error) if !error.errors.is_empty() => {
            let combined: Vec<String> = error
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect();
            Some(Err(Error::cloud_api(format!(
                "operation {:?} failed with error(s): {}",
                op.name,
                combined.join(", ")
            ))))
        }
        _ => Some(Ok(())),
    }
}

#[async_trait]
impl CloudReconciler for GcpReconciler {
    fn provider_name(&self) -> &'static str {
        "gcp"
    }

    async fn reconcile(&mut self, store: Arc<RouteTable>, mut trigger: SyncTrigger) -> Result<()> {
        self.lookup_network().await?;

        loop {
            trigger.tick().await;
            if let Err(error) = self.sync_route_table(&store).await {
                warn!(%error, "failed to sync routes");
            }
        }
    }

    /// Converge the owned route set to empty: one sync cycle against an
    /// empty desired set.
    async fn cleanup(&mut self) -> Result<()> {
        info!("deleting owned routes");

        let current = self.fetch_owned_routes().await?;
        if current.is_empty() {
            info!("no owned routes to delete");
            return Ok(());
        }

        let bearer = self.bearer().await?;
        let this = &*self;

        let deletes = current.iter().map(|route| {
            let bearer = bearer.clone();
            async move {
                info!(route = %route.name, "deleting route");
                delete_route(&this.http, &this.project_id, &bearer, &route.name).await
            }
        });

        let mut operations = Vec::new();
        for result in join_all(deletes).await {
            match result {
                Ok(op) => operations.push(op),
                Err(error) => warn!(%error, "failed to initiate route delete"),
            }
        }
        this.wait_for_ops(&bearer, operations).await;
        Ok(())
    }
}

// ============================================================================
// HTTP helpers
// ============================================================================

async fn fetch_metadata(http: &reqwest::Client, path: &str) -> Result<String> {
    let url = format!("{METADATA_BASE}/{path}");
    let response = http
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(|e| Error::metadata(format!("{path}: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::metadata(format!(
            "{path}: status {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| Error::metadata(format!("{path}: {e}")))
}

/// "projects/1234/zones/us-central1-a" -> "us-central1-a"
fn zone_name(zone_path: &str) -> String {
    zone_path
        .rsplit('/')
        .next()
        .unwrap_or(zone_path)
        .to_string()
}

/// "us-central1-a" -> "us-central1"
fn region_of(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, _)) => region.to_string(),
        None => zone.to_string(),
    }
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

async fn insert_route(
    http: &reqwest::Client,
    project: &str,
    bearer: &str,
    route: &GcpRoute,
) -> Result<Operation> {
    let url = format!("{COMPUTE_BASE}/projects/{project}/global/routes");
    let response = http
        .post(&url)
        .bearer_auth(bearer)
        .json(route)
        .send()
        .await
        .map_err(|e| Error::cloud_api(format!("insert route: {e}")))?;
    let response = check_status("insert route", response).await?;
    response
        .json()
        .await
        .map_err(|e| Error::cloud_api(format!("insert route: malformed operation: {e}")))
}

async fn delete_route(
    http: &reqwest::Client,
    project: &str,
    bearer: &str,
    name: &str,
) -> Result<Operation> {
    let url = format!("{COMPUTE_BASE}/projects/{project}/global/routes/{name}");
    let response = http
        .delete(&url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| Error::cloud_api(format!("delete route: {e}")))?;
    let response = check_status("delete route", response).await?;
    response
        .json()
        .await
        .map_err(|e| Error::cloud_api(format!("delete route: malformed operation: {e}")))
}

/// Poll one operation every [`OP_CHECK_PERIOD`] until DONE, bounded by
/// [`OP_TIMEOUT`]. A timed-out operation is abandoned; the next sync cycle
/// recomputes the diff.
async fn wait_for_op(
    http: &reqwest::Client,
    project: &str,
    bearer: &str,
    op: Operation,
) -> Result<()> {
    let url = format!(
        "{COMPUTE_BASE}/projects/{project}/global/operations/{}",
        op.name
    );

    let poll = async {
        loop {
            tokio::time::sleep(OP_CHECK_PERIOD).await;
            debug!(operation = %op.name, "polling operation");

            let current: Operation = get_json(http, &url, bearer, "get operation").await?;
            if let Some(outcome) = operation_outcome(&current) {
                return outcome;
            }
        }
    };

    match tokio::time::timeout(OP_TIMEOUT, poll).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::op_timeout(format!(
            "operation {:?} did not reach DONE within {}s",
            op.name,
            OP_TIMEOUT.as_secs()
        ))),
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

    fn route(name: &str, dest: &str, network: &str, next_hop: &str) -> GcpRoute {
        GcpRoute {
            name: name.to_string(),
            dest_range: dest.to_string(),
            network: network.to_string(),
            next_hop_ip: next_hop.to_string(),
        }
    }

    #[test]
    fn local_subnet_next_hops_are_skipped() {
        let snap = snapshot(&[
            ("10.20.0.0/16", "10.0.0.9"),
            ("192.168.0.0/16", "192.168.0.1"),
        ]);
        let subnet = "10.0.0.0/24".parse().unwrap();
        let mut cidrs = CidrCache::new();

        let routes = build_routes(&snap, subnet, "projects/p/global/networks/n", "10.0.0.7", &mut cidrs);

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].dest_range, "192.168.0.0/16");
        assert_eq!(routes[0].next_hop_ip, "10.0.0.7");
    }

    #[test]
    fn reserved_destinations_are_dropped() {
        let snap = snapshot(&[
            ("169.254.169.254/32", "172.16.0.1"),
            ("0.5.0.0/16", "172.16.0.1"),
            ("199.36.153.4/30", "172.16.0.1"),
            ("199.36.153.8/30", "172.16.0.1"),
        ]);
        let subnet = "10.0.0.0/24".parse().unwrap();
        let mut cidrs = CidrCache::new();

        let routes = build_routes(&snap, subnet, "net", "10.0.0.7", &mut cidrs);
        assert!(routes.is_empty());
    }

    #[test]
    fn route_names_are_valid_gcp_names() {
        let name = route_name("192.168.0.0/16", "192.168.0.1");
        assert_eq!(name, "cloudroutesync-192-168-0-0slash16192-168-0-1");

        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        assert!(valid && name.starts_with(|c: char| c.is_ascii_lowercase()));
    }

    #[test]
    fn diff_is_set_difference_under_key() {
        let desired = vec![
            route("a", "10.1.0.0/16", "net", "10.0.0.7"),
            route("b", "10.2.0.0/16", "net", "10.0.0.7"),
        ];
        let current = vec![
            route("b2", "10.2.0.0/16", "net", "10.0.0.7"),
            route("c", "10.3.0.0/16", "net", "10.0.0.7"),
        ];

        let (to_add, to_delete) = diff_routes(&desired, &current);

        assert_eq!(to_add.len(), 1);
        assert_eq!(to_add[0].dest_range, "10.1.0.0/16");
        assert_eq!(to_delete.len(), 1);
        assert_eq!(to_delete[0].dest_range, "10.3.0.0/16");
    }

    #[test]
    fn identical_sets_produce_empty_diff() {
        let desired = vec![route("a", "10.1.0.0/16", "net", "10.0.0.7")];
        let current = vec![route("a", "10.1.0.0/16", "net", "10.0.0.7")];

        let (to_add, to_delete) = diff_routes(&desired, &current);
        assert!(to_add.is_empty());
        assert!(to_delete.is_empty());
    }

    #[test]
    fn empty_desired_set_deletes_everything() {
        let current = vec![
            route("a", "10.1.0.0/16", "net", "10.0.0.7"),
            route("b", "10.2.0.0/16", "net", "10.0.0.7"),
        ];

        let (to_add, to_delete) = diff_routes(&[], &current);
        assert!(to_add.is_empty());
        assert_eq!(to_delete.len(), 2);
    }

    #[test]
    fn done_operation_with_errors_surfaces_codes() {
        let op = Operation {
            name: "op-1".to_string(),
            status: "DONE".to_string(),
            error: Some(OperationError {
                errors: vec![OperationErrorDetail {
                    code: "QUOTA".to_string(),
                    message: "route quota exceeded".to_string(),
                }],
            }),
        };

        let outcome = operation_outcome(&op).expect("DONE is terminal");
        let error = outcome.unwrap_err();
        assert!(error.to_string().contains("QUOTA"));
    }

    #[test]
    fn running_operation_has_no_outcome() {
        let op = Operation {
            name: "op-1".to_string(),
            status: "RUNNING".to_string(),
            error: None,
        };
        assert!(operation_outcome(&op).is_none());
    }

    #[test]
    fn zone_and_region_parsing() {
        assert_eq!(zone_name("projects/1234/zones/us-central1-a"), "us-central1-a");
        assert_eq!(region_of("us-central1-a"), "us-central1");
        assert_eq!(region_of("europe-west4-b"), "europe-west4");
    }
}
