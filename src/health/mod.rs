//! Concurrent health probing over the fleet.
//!
//! A probe is a bounded TCP handshake against the node's overlay address.
//! The outcome mapping is deliberate policy: an actively refused handshake
//! means the host is alive and only that port is closed, so it still counts
//! as healthy and online. Only timeouts and transport failures mark a node
//! offline, and an unexpected internal fault yields `Unknown` rather than
//! failing the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::registry::{Node, NodeRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Result of a single probe. Produced fresh every time, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub health: NodeHealth,
    pub is_online: bool,
    pub response_time_ms: Option<f64>,
    pub last_check_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl NodeStatus {
    fn new(node_id: &str, health: NodeHealth, is_online: bool) -> Self {
        Self {
            node_id: node_id.to_string(),
            health,
            is_online,
            response_time_ms: None,
            last_check_at: Utc::now(),
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeWithStatus {
    pub info: Node,
    pub status: NodeStatus,
}

pub struct HealthProber {
    registry: Arc<NodeRegistry>,
    probe_port: u16,
    probe_timeout: Duration,
}

impl HealthProber {
    pub fn new(registry: Arc<NodeRegistry>, probe_port: u16, probe_timeout: Duration) -> Self {
        Self {
            registry,
            probe_port,
            probe_timeout,
        }
    }

    /// Probes a single node. Infallible by contract: every transport outcome
    /// maps to a status record.
    pub async fn probe(&self, node: &Node) -> NodeStatus {
        probe_address(
            &node.id,
            &node.address,
            self.probe_port,
            self.probe_timeout,
        )
        .await
    }

    /// Probes every registered node concurrently, each with its own timeout.
    ///
    /// The result preserves registry order. A probe task that dies is
    /// reported as an `Unknown` status for its node; it never aborts the
    /// batch or cancels sibling probes.
    pub async fn probe_all(&self) -> Vec<NodeWithStatus> {
        let nodes = self.registry.list(None).await;
        if nodes.is_empty() {
            return Vec::new();
        }

        let handles: Vec<_> = nodes
            .iter()
            .map(|node| {
                let id = node.id.clone();
                let address = node.address.clone();
                let port = self.probe_port;
                let per_probe_timeout = self.probe_timeout;
                tokio::spawn(
                    async move { probe_address(&id, &address, port, per_probe_timeout).await },
                )
            })
            .collect();

        let mut results = Vec::with_capacity(nodes.len());
        for (node, handle) in nodes.into_iter().zip(handles) {
            let status = match handle.await {
                Ok(status) => status,
                Err(err) => {
                    let mut status = NodeStatus::new(&node.id, NodeHealth::Unknown, false);
                    status.error_message = Some(format!("probe task failed: {err}"));
                    status
                }
            };
            results.push(NodeWithStatus { info: node, status });
        }
        results
    }
}

async fn probe_address(
    node_id: &str,
    address: &str,
    port: u16,
    per_probe_timeout: Duration,
) -> NodeStatus {
    let target = format!("{address}:{port}");
    let started = Instant::now();

    let outcome = timeout(per_probe_timeout, TcpStream::connect(&target)).await;
    let elapsed_ms = round2(started.elapsed().as_secs_f64() * 1000.0);
    debug!(node_id, target, elapsed_ms, "probe finished");

    let mut status = match outcome {
        Ok(Ok(_stream)) => NodeStatus::new(node_id, NodeHealth::Healthy, true),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
            // Host answered with a RST: alive, just not listening here.
            let mut s = NodeStatus::new(node_id, NodeHealth::Healthy, true);
            s.error_message = Some(format!("port {port} refused connection (host is up)"));
            s
        }
        Ok(Err(err)) => {
            let mut s = NodeStatus::new(node_id, NodeHealth::Unhealthy, false);
            s.error_message = Some(format!("network error: {err}"));
            s
        }
        Err(_) => {
            let mut s = NodeStatus::new(node_id, NodeHealth::Unhealthy, false);
            s.error_message = Some("connection timed out".to_string());
            s
        }
    };
    status.response_time_ms = Some(elapsed_ms);
    status
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
