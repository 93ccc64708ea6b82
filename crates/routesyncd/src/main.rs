// # routesyncd - cloud route sync daemon
//
// Thin integration layer: parses flags, initializes logging, wires the
// netlink monitor to the route table store and hands the store to the
// selected cloud reconciler. All reconciliation logic lives in
// routesync-core and the provider crates.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use routesync_core::{
    change_channel, CloudProvider, CloudReconciler, RouteTable, SyncConfig, SyncTrigger,
};
use routesync_netlink::NetlinkMonitor;
use routesync_provider_aws::AwsReconciler;
use routesync_provider_azure::AzureReconciler;
use routesync_provider_gcp::GcpReconciler;

#[derive(Debug, Parser)]
#[command(
    name = "routesyncd",
    about = "Syncs the kernel routing table into a public cloud route table"
)]
struct Args {
    /// Public cloud provider [azure|aws|gcp]
    #[arg(long)]
    cloud: Option<String>,

    /// Netlink polling interval in seconds
    #[arg(long, default_value_t = 10)]
    netlink: u64,

    /// Cloud routing table sync interval in seconds
    #[arg(long, default_value_t = 10)]
    sync: u64,

    /// Enable event-based sync (default is periodic, controlled by --sync)
    #[arg(long)]
    event: bool,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,

    /// Delete owned cloud resources and exit
    #[arg(long)]
    cleanup: bool,
}

/// Exit codes, following systemd conventions:
/// - 0: clean shutdown (including successful cleanup)
/// - 1: configuration or startup error
/// - 2: runtime error
#[derive(Debug, Clone, Copy)]
enum AgentExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<AgentExitCode> for ExitCode {
    fn from(code: AgentExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let provider = match args.cloud.as_deref() {
        Some(cloud) => match cloud.parse::<CloudProvider>() {
            Ok(provider) => provider,
            Err(error) => {
                eprintln!("{error}");
                return AgentExitCode::ConfigError.into();
            }
        },
        None => {
            eprintln!("--cloud is required [azure|aws|gcp]");
            return AgentExitCode::ConfigError.into();
        }
    };

    let config = SyncConfig {
        provider,
        netlink_poll_secs: args.netlink,
        sync_interval_secs: args.sync,
        event_mode: args.event,
    };
    if let Err(error) = config.validate() {
        eprintln!("{error}");
        return AgentExitCode::ConfigError.into();
    }

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {error}");
        return AgentExitCode::ConfigError.into();
    }

    info!(provider = %config.provider, "starting cloud route sync agent");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to create tokio runtime");
            return AgentExitCode::RuntimeError.into();
        }
    };

    runtime
        .block_on(async {
            match run_daemon(config, args.cleanup).await {
                Ok(code) => code,
                Err(error) => {
                    error!("daemon error: {error:#}");
                    AgentExitCode::RuntimeError
                }
            }
        })
        .into()
}

async fn run_daemon(config: SyncConfig, cleanup: bool) -> Result<AgentExitCode> {
    let mut reconciler = build_reconciler(config.provider).await?;

    if cleanup {
        reconciler.cleanup().await?;
        info!("cleanup finished");
        return Ok(AgentExitCode::CleanShutdown);
    }

    let handle = routesync_netlink::connect()?;

    let default_route = match routesync_netlink::discover_default_route(&handle).await {
        Ok(default_route) => {
            info!(
                interface = %default_route.interface,
                source_ip = %default_route.source_ip,
                "default route discovered"
            );
            Some(default_route)
        }
        Err(error) => {
            warn!(%error, "failed to discover the default route, continuing with empty defaults");
            None
        }
    };

    let (signal_tx, signal_rx) = change_channel();
    let store = Arc::new(RouteTable::new(signal_tx, default_route));
    let trigger = SyncTrigger::new(signal_rx, config.sync_mode());

    let monitor = NetlinkMonitor::new(handle, config.netlink_poll_interval());
    tokio::spawn(monitor.run(Arc::clone(&store)));

    tokio::select! {
        result = reconciler.reconcile(store, trigger) => {
            // reconcile only returns on unrecoverable errors
            match result {
                Ok(()) => Ok(AgentExitCode::CleanShutdown),
                Err(error) => {
                    error!(%error, provider = %config.provider, "reconciler terminated");
                    Ok(AgentExitCode::RuntimeError)
                }
            }
        }
        signal = wait_for_shutdown() => {
            // No drain needed: cloud state is reconvergent on restart.
            info!(%signal, "shutdown signal received");
            Ok(AgentExitCode::CleanShutdown)
        }
    }
}

async fn build_reconciler(provider: CloudProvider) -> Result<Box<dyn CloudReconciler>> {
    let reconciler: Box<dyn CloudReconciler> = match provider {
        CloudProvider::Azure => {
            info!("running on Azure");
            Box::new(AzureReconciler::new()?)
        }
        CloudProvider::Aws => {
            info!("running on AWS");
            Box::new(AwsReconciler::new().await?)
        }
        CloudProvider::Gcp => {
            info!("running on GCP");
            Box::new(GcpReconciler::new().await?)
        }
    };
    Ok(reconciler)
}

#[cfg(unix)]
async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
