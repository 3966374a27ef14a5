//! Provisioning, rollback and state transitions through the controller,
//! with the deployment collaborator stubbed out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use container_fleet_manager::core::errors::FleetError;
use container_fleet_manager::core::instance::{CreateInstanceRequest, InstanceStatus, InstanceStore};
use container_fleet_manager::core::lifecycle::LifecycleController;
use container_fleet_manager::deploy::{DeployRequest, Deployment};
use container_fleet_manager::ledger::{PortLedger, QuotaLedger};
use container_fleet_manager::registry::{Node, NodeRegistry, NodeRole};
use container_fleet_manager::scheduler::{CapacityFeed, CapacityScheduler, NodeCapacity};

#[derive(Default)]
struct MockDeployment {
    fail_deploy: bool,
    fail_stop: bool,
    deploys: AtomicUsize,
    removes: AtomicUsize,
}

#[async_trait]
impl Deployment for MockDeployment {
    async fn deploy(&self, request: &DeployRequest) -> anyhow::Result<String> {
        if self.fail_deploy {
            anyhow::bail!("image pull failed");
        }
        let n = self.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ctr-{}-{n}", request.container_name))
    }

    async fn stop(&self, _address: &str, _handle: &str) -> anyhow::Result<()> {
        if self.fail_stop {
            anyhow::bail!("daemon unreachable");
        }
        Ok(())
    }

    async fn start(&self, _address: &str, _handle: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _address: &str, _handle: &str) -> anyhow::Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedFeed(Vec<NodeCapacity>);

#[async_trait]
impl CapacityFeed for FixedFeed {
    async fn list_available(&self) -> anyhow::Result<Vec<NodeCapacity>> {
        Ok(self.0.clone())
    }
}

struct Harness {
    controller: LifecycleController,
    quota: Arc<QuotaLedger>,
    ports: Arc<PortLedger>,
    store: Arc<InstanceStore>,
    deployment: Arc<MockDeployment>,
}

fn temp_path(kind: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fleet-{kind}-{}.json", uuid::Uuid::new_v4()))
}

async fn harness(deployment: MockDeployment) -> Harness {
    let registry = Arc::new(NodeRegistry::open(temp_path("nodes")).await.unwrap());
    registry
        .add(Node {
            id: "w-01".to_string(),
            hostname: "host-w-01".to_string(),
            address: "10.0.0.1".to_string(),
            role: NodeRole::Worker,
            description: None,
            cpu_cores: Some(8),
            memory_gb: Some(32.0),
            tags: Vec::new(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let feed = Arc::new(FixedFeed(vec![NodeCapacity {
        address: "10.0.0.1".to_string(),
        available_cpu: 8.0,
        available_memory_gb: 32.0,
    }]));
    let scheduler = Arc::new(CapacityScheduler::new(registry.clone(), feed));
    let store = Arc::new(InstanceStore::open(temp_path("instances")).await.unwrap());
    let quota = Arc::new(QuotaLedger::new());
    let ports = Arc::new(PortLedger::new());
    let deployment = Arc::new(deployment);

    let controller = LifecycleController::new(
        store.clone(),
        registry,
        scheduler,
        quota.clone(),
        ports.clone(),
        deployment.clone(),
        "/var/lib/fleet/user-data",
    );
    Harness {
        controller,
        quota,
        ports,
        store,
        deployment,
    }
}

fn request(name: &str) -> CreateInstanceRequest {
    CreateInstanceRequest {
        name: name.to_string(),
        image: "ubuntu:22.04".to_string(),
        cpu: 2,
        memory_gb: 4,
    }
}

#[tokio::test]
async fn create_provisions_and_records() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");

    let instance = h.controller.create("alice", request("web")).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.node_id, "w-01");
    assert_eq!(instance.port, 8000);
    assert!(instance.deployment_handle.is_some());
    assert!(instance.started_at.is_some());
    assert_eq!(instance.access_address().as_deref(), Some("10.0.0.1:8000"));

    assert_eq!(h.ports.allocated_port("w-01", &instance.id), Some(8000));
    let usage = h.quota.usage("alice").unwrap();
    assert_eq!(usage.used_instances, 1);
    assert_eq!(usage.used_cpu, 2);
    assert_eq!(usage.used_memory, 4);

    // Persisted, visible in the owner's listing.
    assert!(h.store.get(&instance.id).await.is_some());
    assert_eq!(h.controller.list("alice").await.len(), 1);
}

#[tokio::test]
async fn deploy_failure_rolls_back_everything() {
    let h = harness(MockDeployment {
        fail_deploy: true,
        ..Default::default()
    })
    .await;
    h.quota.register_user("alice");

    let err = h.controller.create("alice", request("web")).await.unwrap_err();
    assert!(matches!(err, FleetError::DeploymentFailure { .. }));

    // Nothing committed: no record, no quota, and the port is back in the
    // pool for the next attempt.
    assert!(h.controller.list("alice").await.is_empty());
    assert_eq!(h.quota.usage("alice").unwrap().used_instances, 0);
    assert_eq!(h.ports.allocate("w-01", "probe").unwrap(), 8000);
}

#[tokio::test]
async fn invalid_request_commits_nothing() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");

    let mut bad = request("web");
    bad.cpu = 99;
    assert!(matches!(
        h.controller.create("alice", bad).await,
        Err(FleetError::Validation(_))
    ));
    assert_eq!(h.deployment.deploys.load(Ordering::SeqCst), 0);
    assert_eq!(h.quota.usage("alice").unwrap().used_instances, 0);
}

#[tokio::test]
async fn records_are_owner_scoped() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");
    let instance = h.controller.create("alice", request("web")).await.unwrap();

    // Another user's id reads as absent, for get and for mutation alike.
    assert!(matches!(
        h.controller.get("bob", &instance.id).await,
        Err(FleetError::NotFound { .. })
    ));
    assert!(matches!(
        h.controller.terminate("bob", &instance.id).await,
        Err(FleetError::NotFound { .. })
    ));
    assert!(h.controller.get("alice", &instance.id).await.is_ok());
}

#[tokio::test]
async fn stop_start_transitions() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");
    let instance = h.controller.create("alice", request("web")).await.unwrap();

    let stopped = h.controller.stop("alice", &instance.id).await.unwrap();
    assert_eq!(stopped.status, InstanceStatus::Stopped);
    assert!(stopped.stopped_at.is_some());

    // Stop is not idempotent: a stopped instance rejects another stop.
    assert!(matches!(
        h.controller.stop("alice", &instance.id).await,
        Err(FleetError::InvalidState { .. })
    ));

    let started = h.controller.start("alice", &instance.id).await.unwrap();
    assert_eq!(started.status, InstanceStatus::Running);
    assert!(started.stopped_at.is_none());
    assert!(matches!(
        h.controller.start("alice", &instance.id).await,
        Err(FleetError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn failed_stop_parks_instance_in_error() {
    let h = harness(MockDeployment {
        fail_stop: true,
        ..Default::default()
    })
    .await;
    h.quota.register_user("alice");
    let instance = h.controller.create("alice", request("web")).await.unwrap();

    let err = h.controller.stop("alice", &instance.id).await.unwrap_err();
    assert!(matches!(err, FleetError::DeploymentFailure { .. }));

    let parked = h.controller.get("alice", &instance.id).await.unwrap();
    assert_eq!(parked.status, InstanceStatus::Error);
    // Errored instances accept no further start/stop, only terminate.
    assert!(matches!(
        h.controller.start("alice", &instance.id).await,
        Err(FleetError::InvalidState { .. })
    ));
    assert!(h.controller.terminate("alice", &instance.id).await.is_ok());
}

#[tokio::test]
async fn terminate_releases_and_is_idempotent() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");
    let instance = h.controller.create("alice", request("web")).await.unwrap();

    let terminated = h.controller.terminate("alice", &instance.id).await.unwrap();
    assert_eq!(terminated.status, InstanceStatus::Terminated);
    assert_eq!(h.ports.allocated_port("w-01", &instance.id), None);
    assert_eq!(h.quota.usage("alice").unwrap().used_instances, 0);
    assert_eq!(h.deployment.removes.load(Ordering::SeqCst), 1);

    // Second call is a no-op: no second container removal, counters stay
    // where they are.
    let again = h.controller.terminate("alice", &instance.id).await.unwrap();
    assert_eq!(again.status, InstanceStatus::Terminated);
    assert_eq!(h.deployment.removes.load(Ordering::SeqCst), 1);
    assert_eq!(h.quota.usage("alice").unwrap().used_instances, 0);

    // Gone from listings, still queryable by id.
    assert!(h.controller.list("alice").await.is_empty());
    assert!(h.controller.get("alice", &instance.id).await.is_ok());
}

#[tokio::test]
async fn summary_counts_live_states() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");

    let a = h.controller.create("alice", request("a")).await.unwrap();
    let b = h.controller.create("alice", request("b")).await.unwrap();
    let c = h.controller.create("alice", request("c")).await.unwrap();
    h.controller.stop("alice", &b.id).await.unwrap();
    h.controller.terminate("alice", &c.id).await.unwrap();

    let summary = h.controller.summary("alice").await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.running, 1);
    assert_eq!(summary.stopped, 1);
    assert_eq!(summary.pending, 0);
    assert_eq!(h.controller.get("alice", &a.id).await.unwrap().port, 8000);
}

#[tokio::test]
async fn freed_port_returns_to_pool_after_terminate() {
    let h = harness(MockDeployment::default()).await;
    h.quota.register_user("alice");

    let first = h.controller.create("alice", request("a")).await.unwrap();
    let second = h.controller.create("alice", request("b")).await.unwrap();
    assert_eq!(first.port, 8000);
    assert_eq!(second.port, 8001);

    h.controller.terminate("alice", &second.id).await.unwrap();
    let third = h.controller.create("alice", request("c")).await.unwrap();
    // The freed slot comes back first-fit.
    assert_eq!(third.port, 8001);
    assert_eq!(h.ports.allocated_port("w-01", &second.id), None);
}
