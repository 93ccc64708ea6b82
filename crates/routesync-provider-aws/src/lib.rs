// # AWS route table reconciler
//
// Drives a dedicated, tagged VPC route table toward the kernel's routing
// table through the EC2 API.
//
// AWS particulars this module encodes:
// - a subnet can only be associated with one route table, so the agent
//   creates its own and re-points the local subnet at it
// - routes cannot be tagged or named; ownership lives on the table (tag
//   `name=cloudroutesync`), and within it the agent manages exactly the
//   routes that reference a network interface
// - the route "next hop" is a NIC reference, not an IP, so learned next
//   hops are translated through a private-IP -> NIC-ID memo
// - when the agent's table is created, the main table's Internet-gateway
//   default route is copied in first so instances stay reachable

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::error::{DisplayErrorContext, SdkError};
use aws_sdk_ec2::types::{
    Filter, ResourceType, Route, RouteTable as Ec2RouteTable, Tag, TagSpecification,
};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use routesync_core::cidr::{CidrCache, Ipv4Cidr};
use routesync_core::store::{RouteSnapshot, RouteTable};
use routesync_core::traits::CloudReconciler;
use routesync_core::trigger::SyncTrigger;
use routesync_core::{Error, Result};

const IMDS_BASE: &str = "http://169.254.169.254/latest";
const IMDS_TIMEOUT: Duration = Duration::from_secs(5);
const IMDS_TOKEN_TTL_SECS: &str = "21600";

/// Tag value marking the route table the agent owns.
const OWNER_TAG_KEY: &str = "name";
const OWNER_TAG_VALUE: &str = "cloudroutesync";

/// Prefixes AWS special-cases; never programmed into a route table.
const AWS_RESERVED: [Ipv4Cidr; 4] = [
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(224, 0, 0, 0), 4),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(255, 255, 255, 255), 32),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(127, 0, 0, 0), 8),
    Ipv4Cidr::new_unchecked(Ipv4Addr::new(169, 254, 0, 0), 16),
];

/// The slice of the IMDS identity document the agent needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityDocument {
    instance_id: String,
    private_ip: String,
    region: String,
}

/// A route in diffable form: the provider equality tuple
/// `(destinationCidrBlock, networkInterfaceId)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AwsRoute {
    destination: String,
    nic_id: String,
}

/// AWS implementation of [`CloudReconciler`].
pub struct AwsReconciler {
    ec2: aws_sdk_ec2::Client,
    instance_id: String,
    private_ip: String,
    cidrs: CidrCache,
    /// Private IP -> NIC ID, memoized for the reconciler's lifetime.
    nic_ip_to_id: HashMap<String, String>,
    // Discovered once, then fixed.
    subnet_id: Option<String>,
    vpc_id: Option<String>,
    route_table: Option<Ec2RouteTable>,
}

impl AwsReconciler {
    /// Build a reconciler from IMDS identity and the ambient credential
    /// chain. The region comes from the identity document.
    pub async fn new() -> Result<Self> {
        let identity = fetch_identity().await?;

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(identity.region.clone()))
            .load()
            .await;
        let ec2 = aws_sdk_ec2::Client::new(&config);

        debug!(
            instance_id = %identity.instance_id,
            private_ip = %identity.private_ip,
            region = %identity.region,
            "AWS client built"
        );
        Ok(Self {
            ec2,
            instance_id: identity.instance_id,
            private_ip: identity.private_ip,
            cidrs: CidrCache::new(),
            nic_ip_to_id: HashMap::new(),
            subnet_id: None,
            vpc_id: None,
            route_table: None,
        })
    }

    /// Find the NIC on this instance whose private IP matches the IMDS one
    /// and record its subnet and VPC.
    async fn lookup_subnet(&mut self) -> Result<()> {
        debug!(instance_id = %self.instance_id, "looking up subnet");

        let response = self
            .ec2
            .describe_instances()
            .instance_ids(&self.instance_id)
            .send()
            .await
            .map_err(|e| Error::discovery(api_context("DescribeInstances", e)))?;

        for reservation in response.reservations() {
            for instance in reservation.instances() {
                for nic in instance.network_interfaces() {
                    if nic.private_ip_address() != Some(self.private_ip.as_str()) {
                        continue;
                    }
                    let subnet_id = nic
                        .subnet_id()
                        .ok_or_else(|| Error::discovery("matching NIC has no subnet ID"))?;
                    let vpc_id = nic
                        .vpc_id()
                        .ok_or_else(|| Error::discovery("matching NIC has no VPC ID"))?;

                    info!(subnet_id, vpc_id, "local subnet found");
                    self.subnet_id = Some(subnet_id.to_string());
                    self.vpc_id = Some(vpc_id.to_string());
                    return Ok(());
                }
            }
        }

        Err(Error::discovery(format!(
            "no NIC on instance {} matches private IP {}",
            self.instance_id, self.private_ip
        )))
    }

    /// Describe route tables with the given filters, expecting at most one.
    async fn get_route_table(&self, filters: Vec<Filter>) -> Result<Option<Ec2RouteTable>> {
        debug!(?filters, "reading route table");

        let response = self
            .ec2
            .describe_route_tables()
            .set_filters(Some(filters))
            .send()
            .await
            .map_err(|e| Error::cloud_api(api_context("DescribeRouteTables", e)))?;

        exactly_one(response.route_tables().to_vec())
    }

    async fn get_owned_route_table(&self) -> Result<Option<Ec2RouteTable>> {
        self.get_route_table(vec![tag_filter()]).await
    }

    /// Ensure the owned, tagged route table exists and is associated with
    /// the local subnet. On first creation the main table's Internet-gateway
    /// default route is seeded so instances keep their way out.
    async fn ensure_route_table(&mut self) -> Result<()> {
        let vpc_id = self
            .vpc_id
            .clone()
            .ok_or_else(|| Error::discovery("no VPC discovered"))?;

        if let Some(table) = self.get_owned_route_table().await? {
            debug!("route table already exists");
            self.route_table = Some(table);
            return self.associate_route_table().await;
        }

        info!("route table does not exist, creating a new one");

        let main_table = self
            .get_route_table(vec![
                Filter::builder().name("vpc-id").values(&vpc_id).build(),
                Filter::builder()
                    .name("association.main")
                    .values("true")
                    .build(),
            ])
            .await?
            .ok_or_else(|| Error::cloud_api(format!("VPC {vpc_id} has no main route table")))?;

        let created = self
            .ec2
            .create_route_table()
            .vpc_id(&vpc_id)
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::RouteTable)
                    .tags(
                        Tag::builder()
                            .key(OWNER_TAG_KEY)
                            .value(OWNER_TAG_VALUE)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::cloud_api(api_context("CreateRouteTable", e)))?;

        let table = created
            .route_table()
            .cloned()
            .ok_or_else(|| Error::cloud_api("CreateRouteTable returned no route table"))?;
        let table_id = table
            .route_table_id()
            .ok_or_else(|| Error::cloud_api("created route table has no ID"))?
            .to_string();

        if let Some(default_route) = internet_gateway_route(main_table.routes()) {
            info!("seeding the default route from the main route table");
            let mut request = self
                .ec2
                .create_route()
                .route_table_id(&table_id);
            if let Some(destination) = default_route.destination_cidr_block() {
                request = request.destination_cidr_block(destination);
            }
            if let Some(gateway) = default_route.gateway_id() {
                request = request.gateway_id(gateway);
            }
            request
                .send()
                .await
                .map_err(|e| Error::cloud_api(api_context("CreateRoute (default)", e)))?;
        }

        self.route_table = Some(table);
        self.associate_route_table().await
    }

    /// Associate the owned table with the local subnet unless it already is.
    async fn associate_route_table(&mut self) -> Result<()> {
        let subnet_id = self
            .subnet_id
            .clone()
            .ok_or_else(|| Error::discovery("no subnet discovered"))?;
        let table = self
            .route_table
            .as_ref()
            .ok_or_else(|| Error::cloud_api("no route table held yet"))?;
        let table_id = table
            .route_table_id()
            .ok_or_else(|| Error::cloud_api("route table has no ID"))?
            .to_string();

        let already = table
            .associations()
            .iter()
            .any(|assoc| assoc.subnet_id() == Some(subnet_id.as_str()));
        if already {
            debug!("route table is already associated, nothing to do");
            return Ok(());
        }

        info!(%subnet_id, %table_id, "associating route table with the subnet");
        self.ec2
            .associate_route_table()
            .route_table_id(&table_id)
            .subnet_id(&subnet_id)
            .send()
            .await
            .map_err(|e| Error::cloud_api(api_context("AssociateRouteTable", e)))?;
        Ok(())
    }

    /// Translate a next-hop IP into a NIC ID via the memo, falling back to
    /// a lookup of NICs in the local subnet.
    async fn nic_id_from_ip(&mut self, ip: &str) -> Option<String> {
        if let Some(id) = self.nic_ip_to_id.get(ip) {
            return Some(id.clone());
        }

        let subnet_id = self.subnet_id.as_deref()?;
        debug!(%ip, "resolving NIC ID for next hop");

        let response = match self
            .ec2
            .describe_network_interfaces()
            .filters(Filter::builder().name("subnet-id").values(subnet_id).build())
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %api_context("DescribeNetworkInterfaces", error), "NIC lookup failed");
                return None;
            }
        };

        for nic in response.network_interfaces() {
            if nic.private_ip_address() == Some(ip) {
                let id = nic.network_interface_id()?.to_string();
                debug!(%ip, %id, "found a matching NIC");
                self.nic_ip_to_id.insert(ip.to_string(), id.clone());
                return Some(id);
            }
        }

        debug!(%ip, "no NIC in the local subnet matches");
        None
    }

    /// Desired cloud routes for the current snapshot, next hops resolved to
    /// NIC IDs. An unresolvable next hop falls back to this instance's own
    /// NIC (next-hop-self); if even that fails the entry is skipped.
    async fn desired_routes(&mut self, snapshot: &RouteSnapshot) -> Vec<AwsRoute> {
        let mut desired = Vec::new();

        for (prefix, next_hop) in eligible_routes(snapshot, &mut self.cidrs) {
            let nic_id = match self.nic_id_from_ip(&next_hop.to_string()).await {
                Some(id) => id,
                None => {
                    info!(%prefix, %next_hop, "no NIC for next hop, assuming next-hop-self");
                    let own_ip = self.private_ip.clone();
                    match self.nic_id_from_ip(&own_ip).await {
                        Some(id) => id,
                        None => {
                            warn!(%prefix, "cannot resolve even our own NIC, skipping route");
                            continue;
                        }
                    }
                }
            };
            desired.push(AwsRoute {
                destination: prefix,
                nic_id,
            });
        }

        desired
    }

    async fn sync_route_table(&mut self, store: &RouteTable) -> Result<()> {
        let table = self
            .route_table
            .as_ref()
            .ok_or_else(|| Error::cloud_api("no route table held yet"))?;
        let table_id = table
            .route_table_id()
            .ok_or_else(|| Error::cloud_api("route table has no ID"))?
            .to_string();

        let current = owned_nic_routes(table.routes());
        debug!(count = current.len(), "current owned routes");

        let snapshot = store.snapshot().await;
        let desired = self.desired_routes(&snapshot).await;
        debug!(count = desired.len(), "desired routes");

        let (to_add, to_delete) = diff_routes(&desired, &current);
        if to_add.is_empty() && to_delete.is_empty() {
            debug!("route set already converged");
            return Ok(());
        }

        let adds = to_add.iter().map(|route| {
            let request = self
                .ec2
                .create_route()
                .route_table_id(&table_id)
                .destination_cidr_block(&route.destination)
                .network_interface_id(&route.nic_id);
            async move {
                debug!(destination = %route.destination, nic = %route.nic_id, "creating route");
                request.send().await.map(|_| ()).map_err(|e| {
                    Error::cloud_api(api_context("CreateRoute", e))
                })
            }
        });
        let deletes = to_delete.iter().map(|route| {
            let request = self
                .ec2
                .delete_route()
                .route_table_id(&table_id)
                .destination_cidr_block(&route.destination);
            async move {
                debug!(destination = %route.destination, "deleting route");
                request.send().await.map(|_| ()).map_err(|e| {
                    Error::cloud_api(api_context("DeleteRoute", e))
                })
            }
        });

        let (add_results, delete_results) =
            tokio::join!(join_all(adds), join_all(deletes));
        for error in add_results
            .into_iter()
            .chain(delete_results)
            .filter_map(Result::err)
        {
            warn!(%error, "failed route operation");
        }

        // Refresh the local view so the next cycle diffs against post-state.
        info!("refreshing own route table");
        self.route_table = self.get_owned_route_table().await?;
        Ok(())
    }
}

/// Snapshot entries that survive reserved-range filtering, as
/// `(prefix, next_hop)` pairs.
fn eligible_routes(snapshot: &RouteSnapshot, cidrs: &mut CidrCache) -> Vec<(String, Ipv4Addr)> {
    let mut eligible = Vec::new();

    for (prefix, next_hop) in snapshot {
        let cidr = match cidrs.parse(prefix) {
            Ok(cidr) => cidr,
            Err(error) => {
                warn!(%prefix, %error, "skipping unparsable kernel prefix");
                continue;
            }
        };
        if AWS_RESERVED.iter().any(|r| r.contains(cidr.address())) {
            debug!(%prefix, "destination in AWS reserved ranges, skipping");
            continue;
        }
        eligible.push((prefix.clone(), *next_hop));
    }

    eligible
}

/// The routes the agent owns inside its table: exactly those that reference
/// a network interface. The seeded Internet-gateway route and VPC-local
/// routes carry no NIC and are never touched.
fn owned_nic_routes(routes: &[Route]) -> Vec<AwsRoute> {
    routes
        .iter()
        .filter_map(|route| {
            let destination = route.destination_cidr_block()?;
            let nic_id = route.network_interface_id()?;
            Some(AwsRoute {
                destination: destination.to_string(),
                nic_id: nic_id.to_string(),
            })
        })
        .collect()
}

/// Set difference in both directions under `(destination, nic_id)` equality.
fn diff_routes<'a>(
    desired: &'a [AwsRoute],
    current: &'a [AwsRoute],
) -> (Vec<&'a AwsRoute>, Vec<&'a AwsRoute>) {
    let current_set: HashSet<&AwsRoute> = current.iter().collect();
    let desired_set: HashSet<&AwsRoute> = desired.iter().collect();

    let to_add = desired
        .iter()
        .filter(|route| !current_set.contains(route))
        .collect();
    let to_delete = current
        .iter()
        .filter(|route| !desired_set.contains(route))
        .collect();
    (to_add, to_delete)
}

/// The main table's route out through an Internet gateway, if any.
fn internet_gateway_route(routes: &[Route]) -> Option<&Route> {
    routes
        .iter()
        .find(|route| route.gateway_id().is_some_and(|gw| gw.starts_with("igw")))
}

fn exactly_one(mut tables: Vec<Ec2RouteTable>) -> Result<Option<Ec2RouteTable>> {
    match tables.len() {
        0 => Ok(None),
        1 => Ok(Some(tables.remove(0))),
        n => Err(Error::cloud_api(format!(
            "found an unexpected number of route tables: {n}"
        ))),
    }
}

fn tag_filter() -> Filter {
    Filter::builder()
        .name(format!("tag:{OWNER_TAG_KEY}"))
        .values(OWNER_TAG_VALUE)
        .build()
}

fn api_context<E>(context: &str, error: SdkError<E>) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{context}: {}", DisplayErrorContext(error))
}

#[async_trait]
impl CloudReconciler for AwsReconciler {
    fn provider_name(&self) -> &'static str {
        "aws"
    }

    async fn reconcile(&mut self, store: Arc<RouteTable>, mut trigger: SyncTrigger) -> Result<()> {
        self.lookup_subnet().await?;
        self.ensure_route_table().await?;

        loop {
            trigger.tick().await;
            if let Err(error) = self.sync_route_table(&store).await {
                warn!(%error, "failed to sync route table");
            }
        }
    }

    /// Disassociate the owned route table from every subnet, then delete it.
    async fn cleanup(&mut self) -> Result<()> {
        info!("deleting own route table");

        let Some(table) = self.get_owned_route_table().await? else {
            info!("no owned route table found, nothing to clean up");
            return Ok(());
        };
        let table_id = table
            .route_table_id()
            .ok_or_else(|| Error::cloud_api("route table has no ID"))?;

        for assoc in table.associations() {
            let Some(assoc_id) = assoc.route_table_association_id() else {
                continue;
            };
            debug!(%assoc_id, "disassociating route table");
            if let Err(error) = self
                .ec2
                .disassociate_route_table()
                .association_id(assoc_id)
                .send()
                .await
            {
                warn!(error = %api_context("DisassociateRouteTable", error), "failed to disassociate");
            }
        }

        debug!(%table_id, "deleting route table");
        self.ec2
            .delete_route_table()
            .route_table_id(table_id)
            .send()
            .await
            .map_err(|e| Error::cloud_api(api_context("DeleteRouteTable", e)))?;
        Ok(())
    }
}

/// Fetch the IMDSv2 instance identity document.
async fn fetch_identity() -> Result<IdentityDocument> {
    let http = reqwest::Client::builder()
        .timeout(IMDS_TIMEOUT)
        .build()
        .map_err(|e| Error::metadata(format!("failed to build HTTP client: {e}")))?;

    let token = http
        .put(format!("{IMDS_BASE}/api/token"))
        .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS)
        .send()
        .await
        .map_err(|e| Error::metadata(format!("IMDS token request failed: {e}")))?
        .error_for_status()
        .map_err(|e| Error::metadata(format!("IMDS token request rejected: {e}")))?
        .text()
        .await
        .map_err(|e| Error::metadata(format!("IMDS token unreadable: {e}")))?;

    let document = http
        .get(format!("{IMDS_BASE}/dynamic/instance-identity/document"))
        .header("X-aws-ec2-metadata-token", token)
        .send()
        .await
        .map_err(|e| Error::metadata(format!("identity document request failed: {e}")))?
        .error_for_status()
        .map_err(|e| Error::metadata(format!("identity document request rejected: {e}")))?
        .json::<IdentityDocument>()
        .await
        .map_err(|e| Error::metadata(format!("malformed identity document: {e}")))?;

    Ok(document)
}
