//! Instance model and record store.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::core::errors::{FleetError, FleetResult};

pub const MAX_CPU_PER_INSTANCE: u32 = 8;
pub const MAX_MEMORY_GB_PER_INSTANCE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Stopped,
    Terminated,
    Error,
}

impl InstanceStatus {
    /// Terminated and errored instances accept no further start/stop.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Terminated | InstanceStatus::Error)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

fn default_image() -> String {
    "ubuntu:22.04".to_string()
}

fn default_cpu() -> u32 {
    1
}

fn default_memory() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory")]
    pub memory_gb: u32,
}

impl CreateInstanceRequest {
    pub fn validate(&self) -> FleetResult<()> {
        if self.name.is_empty() || self.name.len() > 64 {
            return Err(FleetError::Validation(
                "instance name must be 1-64 characters".to_string(),
            ));
        }
        if self.cpu < 1 || self.cpu > MAX_CPU_PER_INSTANCE {
            return Err(FleetError::Validation(format!(
                "cpu must be between 1 and {MAX_CPU_PER_INSTANCE}"
            )));
        }
        if self.memory_gb < 1 || self.memory_gb > MAX_MEMORY_GB_PER_INSTANCE {
            return Err(FleetError::Validation(format!(
                "memory_gb must be between 1 and {MAX_MEMORY_GB_PER_INSTANCE}"
            )));
        }
        Ok(())
    }
}

/// A user workload placed on a fleet node. Owned exclusively by its creating
/// user and mutated only through the lifecycle controller; termination is a
/// status transition, the record is never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub image: String,
    pub user_id: String,
    pub node_id: String,
    pub port: u16,
    pub cpu: u32,
    pub memory_gb: u32,
    pub status: InstanceStatus,
    /// Overlay address of the placement node.
    pub public_ip: Option<String>,
    /// Opaque handle from the deployment collaborator.
    pub deployment_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(
        user_id: &str,
        node_id: &str,
        public_ip: &str,
        port: u16,
        request: &CreateInstanceRequest,
    ) -> Self {
        Self {
            id: short_id(),
            name: request.name.clone(),
            image: request.image.clone(),
            user_id: user_id.to_string(),
            node_id: node_id.to_string(),
            port,
            cpu: request.cpu,
            memory_gb: request.memory_gb,
            status: InstanceStatus::Pending,
            public_ip: Some(public_ip.to_string()),
            deployment_handle: None,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn access_address(&self) -> Option<String> {
        self.public_ip.as_ref().map(|ip| format!("{ip}:{}", self.port))
    }
}

fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("i-{}", &id[..8])
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InstanceSummary {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub pending: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    instances: HashMap<String, Instance>,
}

/// JSON-file instance store. One lock serializes every read-modify-write;
/// records are only written once fully provisioned.
pub struct InstanceStore {
    path: PathBuf,
    instances: RwLock<HashMap<String, Instance>>,
}

impl InstanceStore {
    pub async fn open(path: impl Into<PathBuf>) -> FleetResult<Self> {
        let path = path.into();
        let instances = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile =
                    serde_json::from_slice(&bytes).map_err(FleetError::persistence)?;
                file.instances
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(FleetError::persistence)?;
                }
                HashMap::new()
            }
            Err(err) => return Err(FleetError::persistence(err)),
        };
        info!(path = %path.display(), instances = instances.len(), "instance store loaded");
        Ok(Self {
            path,
            instances: RwLock::new(instances),
        })
    }

    async fn save(&self, instances: &HashMap<String, Instance>) -> FleetResult<()> {
        let file = StoreFile {
            instances: instances.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(FleetError::persistence)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(FleetError::persistence)
    }

    pub async fn put(&self, instance: Instance) -> FleetResult<()> {
        let mut instances = self.instances.write().await;
        instances.insert(instance.id.clone(), instance);
        self.save(&instances).await
    }

    pub async fn get(&self, instance_id: &str) -> Option<Instance> {
        self.instances.read().await.get(instance_id).cloned()
    }

    /// Live (non-terminated) instances for one user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Vec<Instance> {
        let instances = self.instances.read().await;
        let mut out: Vec<Instance> = instances
            .values()
            .filter(|i| i.user_id == user_id && i.status != InstanceStatus::Terminated)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn summary_for_user(&self, user_id: &str) -> InstanceSummary {
        let instances = self.list_for_user(user_id).await;
        let mut summary = InstanceSummary {
            total: instances.len(),
            ..Default::default()
        };
        for instance in &instances {
            match instance.status {
                InstanceStatus::Running => summary.running += 1,
                InstanceStatus::Stopped => summary.stopped += 1,
                InstanceStatus::Pending => summary.pending += 1,
                _ => {}
            }
        }
        summary
    }
}
