//! Node registry: simple CRUD over the fleet's node records.
//!
//! Nodes are registered once and changed only through explicit update calls;
//! live health never lands here. Backed by a JSON file with all
//! read-modify-write cycles serialized behind one lock.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::core::errors::{FleetError, FleetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
    Storage,
}

impl Default for NodeRole {
    fn default() -> Self {
        NodeRole::Worker
    }
}

/// A fleet machine reachable over the private overlay network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    /// Overlay network address the prober and deployer dial.
    pub address: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub description: Option<String>,
    /// Declared capacity; the live capacity feed is authoritative for
    /// scheduling.
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_gb: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    nodes: HashMap<String, Node>,
}

pub struct NodeRegistry {
    path: PathBuf,
    nodes: RwLock<HashMap<String, Node>>,
}

impl NodeRegistry {
    /// Opens the registry file, creating an empty one if missing.
    pub async fn open(path: impl Into<PathBuf>) -> FleetResult<Self> {
        let path = path.into();
        let nodes = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: RegistryFile =
                    serde_json::from_slice(&bytes).map_err(FleetError::persistence)?;
                file.nodes
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
        info!(path = %path.display(), nodes = nodes.len(), "node registry loaded");
        Ok(Self {
            path,
            nodes: RwLock::new(nodes),
        })
    }

    async fn save(&self, nodes: &HashMap<String, Node>) -> FleetResult<()> {
        let file = RegistryFile {
            nodes: nodes.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(FleetError::persistence)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(FleetError::persistence)
    }

    pub async fn list(&self, role: Option<NodeRole>) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        let mut out: Vec<Node> = nodes
            .values()
            .filter(|n| role.map_or(true, |r| n.role == r))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn get(&self, node_id: &str) -> FleetResult<Node> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| FleetError::not_found("node", node_id))
    }

    pub async fn add(&self, node: Node) -> FleetResult<Node> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(FleetError::Validation(format!(
                "node already registered: {}",
                node.id
            )));
        }
        nodes.insert(node.id.clone(), node.clone());
        self.save(&nodes).await?;
        info!(node_id = %node.id, address = %node.address, "node registered");
        Ok(node)
    }

    pub async fn update(&self, node_id: &str, node: Node) -> FleetResult<Node> {
        let mut nodes = self.nodes.write().await;
        if !nodes.contains_key(node_id) {
            return Err(FleetError::not_found("node", node_id));
        }
        nodes.insert(node_id.to_string(), node.clone());
        self.save(&nodes).await?;
        Ok(node)
    }

    pub async fn delete(&self, node_id: &str) -> FleetResult<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.remove(node_id).is_none() {
            return Err(FleetError::not_found("node", node_id));
        }
        self.save(&nodes).await?;
        info!(node_id, "node removed");
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.nodes.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str) -> Node {
        Node {
            id: id.to_string(),
            hostname: format!("host-{id}"),
            address: "100.64.0.1".to_string(),
            role: NodeRole::Worker,
            description: None,
            cpu_cores: Some(8),
            memory_gb: Some(32.0),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn temp_registry_path() -> PathBuf {
        std::env::temp_dir().join(format!("fleet-registry-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let registry = NodeRegistry::open(temp_registry_path()).await.unwrap();
        registry.add(worker("node-01")).await.unwrap();
        assert_eq!(registry.count().await, 1);

        let fetched = registry.get("node-01").await.unwrap();
        assert_eq!(fetched.hostname, "host-node-01");

        registry.delete("node-01").await.unwrap();
        assert!(matches!(
            registry.get("node-01").await,
            Err(FleetError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_filters_by_role() {
        let registry = NodeRegistry::open(temp_registry_path()).await.unwrap();
        let mut master = worker("node-00");
        master.role = NodeRole::Master;
        registry.add(master).await.unwrap();
        registry.add(worker("node-02")).await.unwrap();
        registry.add(worker("node-01")).await.unwrap();

        let workers = registry.list(Some(NodeRole::Worker)).await;
        let ids: Vec<_> = workers.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["node-01", "node-02"]);
        assert_eq!(registry.list(None).await.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_add_rejected() {
        let registry = NodeRegistry::open(temp_registry_path()).await.unwrap();
        registry.add(worker("node-01")).await.unwrap();
        assert!(matches!(
            registry.add(worker("node-01")).await,
            Err(FleetError::Validation(_))
        ));
    }
}
