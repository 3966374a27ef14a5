//! Cluster-wide health aggregation.
//!
//! `aggregate` is a pure reduction over probe results; the grade ladder and
//! the summary messages are contract, exercised bit-for-bit by tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{NodeHealth, NodeWithStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterHealth {
    Healthy,
    Degraded,
    Critical,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    pub availability_percent: f64,
}

impl ClusterSummary {
    fn grade(&self) -> ClusterHealth {
        if self.total_nodes == 0 {
            ClusterHealth::Offline
        } else if self.availability_percent >= 100.0 {
            ClusterHealth::Healthy
        } else if self.availability_percent >= 80.0 {
            ClusterHealth::Degraded
        } else if self.availability_percent > 0.0 {
            ClusterHealth::Critical
        } else {
            ClusterHealth::Offline
        }
    }
}

/// Point-in-time aggregate view; rebuilt on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster_name: String,
    pub health: ClusterHealth,
    pub summary: ClusterSummary,
    pub checked_at: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeWithStatus>>,
}

pub fn aggregate(
    cluster_name: &str,
    statuses: Vec<NodeWithStatus>,
    include_nodes: bool,
) -> ClusterSnapshot {
    let total = statuses.len();
    let online = statuses.iter().filter(|n| n.status.is_online).count();
    let healthy = statuses
        .iter()
        .filter(|n| n.status.health == NodeHealth::Healthy)
        .count();
    let unhealthy = statuses
        .iter()
        .filter(|n| n.status.health == NodeHealth::Unhealthy)
        .count();

    let availability = if total == 0 {
        0.0
    } else {
        round2(online as f64 / total as f64 * 100.0)
    };

    let summary = ClusterSummary {
        total_nodes: total,
        online_nodes: online,
        offline_nodes: total - online,
        healthy_nodes: healthy,
        unhealthy_nodes: unhealthy,
        availability_percent: availability,
    };
    let health = summary.grade();

    let message = match health {
        ClusterHealth::Healthy => "All nodes are operating normally.".to_string(),
        ClusterHealth::Degraded => format!(
            "Some nodes are degraded. ({} unhealthy)",
            summary.unhealthy_nodes
        ),
        ClusterHealth::Critical => format!(
            "A majority of nodes are offline. ({} offline)",
            summary.offline_nodes
        ),
        ClusterHealth::Offline => "No nodes are reachable in the cluster.".to_string(),
    };

    ClusterSnapshot {
        cluster_name: cluster_name.to_string(),
        health,
        summary,
        checked_at: Utc::now(),
        message,
        nodes: include_nodes.then_some(statuses),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
