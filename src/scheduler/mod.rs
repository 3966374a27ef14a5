//! Capacity-aware placement.
//!
//! The scheduler consumes a point-in-time snapshot from the capacity feed;
//! there is no transactional linkage to the ledger, so a race between "feed
//! says room" and a later allocation is benign and retried by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::errors::{FleetError, FleetResult};
use crate::registry::{NodeRegistry, NodeRole};

/// Fixed schema at the capacity-feed boundary: live per-node headroom as
/// reported by the distributed compute-resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub address: String,
    pub available_cpu: f64,
    pub available_memory_gb: f64,
}

#[async_trait]
pub trait CapacityFeed: Send + Sync {
    async fn list_available(&self) -> anyhow::Result<Vec<NodeCapacity>>;
}

/// Capacity feed over the resource manager's HTTP endpoint.
pub struct RestCapacityFeed {
    endpoint: String,
    client: hyper::Client<hyper::client::HttpConnector>,
}

impl RestCapacityFeed {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: hyper::Client::new(),
        }
    }
}

#[async_trait]
impl CapacityFeed for RestCapacityFeed {
    async fn list_available(&self) -> anyhow::Result<Vec<NodeCapacity>> {
        let uri: hyper::Uri = format!("{}/nodes/available", self.endpoint).parse()?;
        let response = self.client.get(uri).await?;
        if !response.status().is_success() {
            anyhow::bail!("capacity feed returned {}", response.status());
        }
        let body = hyper::body::to_bytes(response.into_body()).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// A placement decision. `degraded` marks the random fallback taken when the
/// capacity feed was unreachable, so callers can tell it apart from a
/// capacity-validated choice.
#[derive(Debug, Clone)]
pub struct Placement {
    pub node_id: String,
    pub degraded: bool,
}

pub struct CapacityScheduler {
    registry: Arc<NodeRegistry>,
    feed: Arc<dyn CapacityFeed>,
}

impl CapacityScheduler {
    pub fn new(registry: Arc<NodeRegistry>, feed: Arc<dyn CapacityFeed>) -> Self {
        Self { registry, feed }
    }

    /// Picks a worker able to satisfy the request, preferring the node with
    /// the strictly greatest available cpu; ties break to the lowest node id
    /// for determinism.
    pub async fn select_node(&self, cpu: u32, memory_gb: u32) -> FleetResult<Placement> {
        // Registry order is sorted by id, which is what makes the tie break
        // deterministic below.
        let workers = self.registry.list(Some(NodeRole::Worker)).await;
        if workers.is_empty() {
            return Err(FleetError::InsufficientCapacity {
                requested_cpu: cpu,
                requested_memory: memory_gb,
                max_cpu: 0,
                max_memory: 0,
            });
        }

        let entries = match self.feed.list_available().await {
            Ok(entries) => entries,
            Err(err) => {
                // Degraded mode: place blind rather than refuse service.
                warn!(error = %err, "capacity feed unreachable, falling back to random placement");
                // workers was checked non-empty above.
                if let Some(choice) = workers.choose(&mut rand::thread_rng()) {
                    return Ok(Placement {
                        node_id: choice.id.clone(),
                        degraded: true,
                    });
                }
                return Err(FleetError::InsufficientCapacity {
                    requested_cpu: cpu,
                    requested_memory: memory_gb,
                    max_cpu: 0,
                    max_memory: 0,
                });
            }
        };

        let by_address: HashMap<&str, &NodeCapacity> = entries
            .iter()
            .map(|e| (e.address.as_str(), e))
            .collect();

        let mut best: Option<(&str, f64)> = None;
        for worker in &workers {
            let Some(capacity) = by_address.get(worker.address.as_str()) else {
                continue;
            };
            if capacity.available_cpu < cpu as f64
                || capacity.available_memory_gb < memory_gb as f64
            {
                continue;
            }
            if best.map_or(true, |(_, cpu_best)| capacity.available_cpu > cpu_best) {
                best = Some((worker.id.as_str(), capacity.available_cpu));
            }
        }

        if let Some((node_id, available_cpu)) = best {
            debug!(node_id, available_cpu, "placement selected");
            return Ok(Placement {
                node_id: node_id.to_string(),
                degraded: false,
            });
        }

        // No survivor: report the true cluster-wide maxima so the caller can
        // explain the shortfall.
        let mut max_cpu = 0.0f64;
        let mut max_memory = 0.0f64;
        for worker in &workers {
            if let Some(capacity) = by_address.get(worker.address.as_str()) {
                max_cpu = max_cpu.max(capacity.available_cpu);
                max_memory = max_memory.max(capacity.available_memory_gb);
            }
        }
        Err(FleetError::InsufficientCapacity {
            requested_cpu: cpu,
            requested_memory: memory_gb,
            max_cpu: max_cpu as u32,
            max_memory: max_memory as u32,
        })
    }
}
