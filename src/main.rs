use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use container_fleet_manager::api::{create_router, AppState};
use container_fleet_manager::config::Settings;
use container_fleet_manager::core::instance::InstanceStore;
use container_fleet_manager::core::lifecycle::LifecycleController;
use container_fleet_manager::deploy::DockerDeployer;
use container_fleet_manager::health::HealthProber;
use container_fleet_manager::ledger::{PortLedger, QuotaLedger};
use container_fleet_manager::registry::NodeRegistry;
use container_fleet_manager::scheduler::{CapacityScheduler, RestCapacityFeed};

#[derive(Parser, Debug)]
#[command(name = "container-fleet-manager", about = "Self-service container placement portal")]
struct Args {
    /// Configuration directory (overrides CONFIG_PATH).
    #[arg(long)]
    config: Option<String>,
    /// Listen address override, e.g. 0.0.0.0:3000.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    if let Some(config) = &args.config {
        std::env::set_var("CONFIG_PATH", config);
    }

    let settings = Settings::new()?;
    info!(cluster = %settings.cluster.name, "starting container fleet manager");

    let registry =
        Arc::new(NodeRegistry::open(settings.storage.data_dir.join("nodes.json")).await?);
    let store =
        Arc::new(InstanceStore::open(settings.storage.data_dir.join("instances.json")).await?);
    let quota = Arc::new(QuotaLedger::new());
    let ports = Arc::new(PortLedger::new());

    let prober = Arc::new(HealthProber::new(
        registry.clone(),
        settings.cluster.probe_port,
        Duration::from_millis(settings.cluster.probe_timeout_ms),
    ));
    let feed = Arc::new(RestCapacityFeed::new(settings.capacity_feed.endpoint.clone()));
    let scheduler = Arc::new(CapacityScheduler::new(registry.clone(), feed));
    let deployer = Arc::new(DockerDeployer::new(settings.deploy.docker_port));

    let controller = Arc::new(LifecycleController::new(
        store,
        registry.clone(),
        scheduler,
        quota.clone(),
        ports.clone(),
        deployer,
        settings.deploy.workspace_root.clone(),
    ));

    let state = AppState {
        controller,
        registry,
        prober,
        quota,
        ports,
        cluster_name: settings.cluster.name.clone(),
    };
    let app = create_router(state);

    let addr = args
        .listen
        .unwrap_or_else(|| format!("{}:{}", settings.server.host, settings.server.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
