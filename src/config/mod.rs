use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub cluster: ClusterSettings,
    pub capacity_feed: CapacityFeedSettings,
    pub deploy: DeploySettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub name: String,
    /// Port the health prober dials on every node.
    pub probe_port: u16,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapacityFeedSettings {
    /// Base URL of the compute-resource manager.
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Port of the Docker daemon on each worker.
    pub docker_port: u16,
    /// Host directory under which per-user workspaces are created.
    pub workspace_root: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
}

impl Settings {
    /// Layered load: hardcoded defaults, then `default.toml`, then an
    /// optional `local.toml`, then `APP_*` environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        info!("loading configuration from path: {}", config_path);

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("cluster.name", "fleet-cluster")?
            .set_default("cluster.probe_port", 22)?
            .set_default("cluster.probe_timeout_ms", 3000)?
            .set_default("capacity_feed.endpoint", "http://127.0.0.1:8265")?
            .set_default("deploy.docker_port", 2375)?
            .set_default("deploy.workspace_root", "/var/lib/fleet/user-data")?
            .set_default("storage.data_dir", "/var/lib/fleet/data")?
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
