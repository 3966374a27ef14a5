//! Instance lifecycle controller.
//!
//! Orchestrates the provisioning sequence across scheduler, ledger and the
//! deployment collaborator. The create path commits resources in a fixed
//! order and releases everything committed so far whenever a later step
//! fails; no path leaks an allocated port or quota unit.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::errors::{FleetError, FleetResult};
use crate::core::instance::{
    CreateInstanceRequest, Instance, InstanceStatus, InstanceStore, InstanceSummary,
};
use crate::deploy::{DeployRequest, Deployment};
use crate::ledger::{PortLedger, QuotaLedger};
use crate::registry::NodeRegistry;
use crate::scheduler::CapacityScheduler;

pub struct LifecycleController {
    store: Arc<InstanceStore>,
    registry: Arc<NodeRegistry>,
    scheduler: Arc<CapacityScheduler>,
    quota: Arc<QuotaLedger>,
    ports: Arc<PortLedger>,
    deployment: Arc<dyn Deployment>,
    /// Root of per-user persistent workspaces on the worker hosts.
    workspace_root: String,
}

impl LifecycleController {
    pub fn new(
        store: Arc<InstanceStore>,
        registry: Arc<NodeRegistry>,
        scheduler: Arc<CapacityScheduler>,
        quota: Arc<QuotaLedger>,
        ports: Arc<PortLedger>,
        deployment: Arc<dyn Deployment>,
        workspace_root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            scheduler,
            quota,
            ports,
            deployment,
            workspace_root: workspace_root.into(),
        }
    }

    /// Provisioning sequence: quota check, placement, port allocate, quota
    /// commit, deploy. A scheduling failure aborts with nothing committed; a
    /// deployment failure rolls back the port and quota committed in the
    /// steps before it.
    pub async fn create(
        &self,
        user_id: &str,
        request: CreateInstanceRequest,
    ) -> FleetResult<Instance> {
        request.validate()?;
        self.quota.check(user_id, request.cpu, request.memory_gb)?;

        let placement = self
            .scheduler
            .select_node(request.cpu, request.memory_gb)
            .await?;
        let node = self.registry.get(&placement.node_id).await?;
        if placement.degraded {
            warn!(
                node_id = %node.id,
                user_id,
                "placement made in degraded mode without capacity validation"
            );
        }

        let mut instance = Instance::new(user_id, &node.id, &node.address, 0, &request);
        let port = self.ports.allocate(&node.id, &instance.id)?;
        instance.port = port;
        let quota_recorded = self.quota.allocate(user_id, request.cpu, request.memory_gb);

        let deploy_request = DeployRequest {
            address: node.address.clone(),
            container_name: format!("fleet-{}-{}", user_id, instance.id),
            image: request.image.clone(),
            cpu: request.cpu,
            memory_gb: request.memory_gb,
            port,
            volume_hint: Some(format!("{}/{}/{}", self.workspace_root, user_id, instance.id)),
            env: HashMap::from([
                ("FLEET_INSTANCE_ID".to_string(), instance.id.clone()),
                ("FLEET_OWNER".to_string(), user_id.to_string()),
            ]),
        };

        let handle = match self.deployment.deploy(&deploy_request).await {
            Ok(handle) => handle,
            Err(err) => {
                self.rollback(user_id, &instance, quota_recorded);
                error!(
                    user_id,
                    node_id = %node.id,
                    error = %err,
                    "deployment failed, provisioning rolled back"
                );
                return Err(FleetError::DeploymentFailure {
                    address: node.address,
                    message: err.to_string(),
                });
            }
        };

        instance.status = InstanceStatus::Running;
        instance.started_at = Some(chrono::Utc::now());
        instance.deployment_handle = Some(handle.clone());

        if let Err(err) = self.store.put(instance.clone()).await {
            // The record must never exist half-provisioned, so a persistence
            // failure unwinds the whole step including the live container.
            if let Err(remove_err) = self.deployment.remove(&node.address, &handle).await {
                warn!(error = %remove_err, "failed to remove container during unwind");
            }
            self.rollback(user_id, &instance, quota_recorded);
            return Err(err);
        }

        info!(
            instance_id = %instance.id,
            user_id,
            node_id = %node.id,
            port,
            "instance created"
        );
        Ok(instance)
    }

    fn rollback(&self, user_id: &str, instance: &Instance, quota_recorded: bool) {
        self.ports.release(&instance.node_id, &instance.id);
        if quota_recorded {
            self.quota.release(user_id, instance.cpu, instance.memory_gb);
        }
    }

    /// Owner-scoped fetch. A record owned by someone else reads as absent.
    pub async fn get(&self, user_id: &str, instance_id: &str) -> FleetResult<Instance> {
        match self.store.get(instance_id).await {
            Some(instance) if instance.user_id == user_id => Ok(instance),
            _ => Err(FleetError::not_found("instance", instance_id)),
        }
    }

    pub async fn list(&self, user_id: &str) -> Vec<Instance> {
        self.store.list_for_user(user_id).await
    }

    pub async fn summary(&self, user_id: &str) -> InstanceSummary {
        self.store.summary_for_user(user_id).await
    }

    pub async fn stop(&self, user_id: &str, instance_id: &str) -> FleetResult<Instance> {
        let mut instance = self.get(user_id, instance_id).await?;
        if !matches!(
            instance.status,
            InstanceStatus::Running | InstanceStatus::Pending
        ) {
            return Err(FleetError::InvalidState {
                id: instance.id,
                status: instance.status.to_string(),
                operation: "stop",
            });
        }

        if let (Some(handle), Some(address)) =
            (instance.deployment_handle.clone(), instance.public_ip.clone())
        {
            if let Err(err) = self.deployment.stop(&address, &handle).await {
                instance.status = InstanceStatus::Error;
                self.store.put(instance).await?;
                return Err(FleetError::DeploymentFailure {
                    address,
                    message: err.to_string(),
                });
            }
        }

        instance.status = InstanceStatus::Stopped;
        instance.stopped_at = Some(chrono::Utc::now());
        self.store.put(instance.clone()).await?;
        info!(instance_id = %instance.id, user_id, "instance stopped");
        Ok(instance)
    }

    pub async fn start(&self, user_id: &str, instance_id: &str) -> FleetResult<Instance> {
        let mut instance = self.get(user_id, instance_id).await?;
        if instance.status != InstanceStatus::Stopped {
            return Err(FleetError::InvalidState {
                id: instance.id,
                status: instance.status.to_string(),
                operation: "start",
            });
        }

        if let (Some(handle), Some(address)) =
            (instance.deployment_handle.clone(), instance.public_ip.clone())
        {
            if let Err(err) = self.deployment.start(&address, &handle).await {
                return Err(FleetError::DeploymentFailure {
                    address,
                    message: err.to_string(),
                });
            }
        }

        instance.status = InstanceStatus::Running;
        instance.started_at = Some(chrono::Utc::now());
        instance.stopped_at = None;
        self.store.put(instance.clone()).await?;
        info!(instance_id = %instance.id, user_id, "instance started");
        Ok(instance)
    }

    /// Terminates from any state. Idempotent: a second call finds the record
    /// already terminated and leaves the ledger untouched.
    pub async fn terminate(&self, user_id: &str, instance_id: &str) -> FleetResult<Instance> {
        let mut instance = self.get(user_id, instance_id).await?;
        if instance.status == InstanceStatus::Terminated {
            return Ok(instance);
        }

        if let (Some(handle), Some(address)) =
            (instance.deployment_handle.clone(), instance.public_ip.clone())
        {
            // Best effort: the ledger must be released even when the remote
            // daemon is unreachable.
            if let Err(err) = self.deployment.remove(&address, &handle).await {
                warn!(
                    instance_id = %instance.id,
                    error = %err,
                    "container removal failed during terminate"
                );
            }
        }

        self.ports.release(&instance.node_id, &instance.id);
        self.quota.release(user_id, instance.cpu, instance.memory_gb);

        instance.status = InstanceStatus::Terminated;
        instance.stopped_at = Some(chrono::Utc::now());
        self.store.put(instance.clone()).await?;
        info!(instance_id = %instance.id, user_id, "instance terminated");
        Ok(instance)
    }
}
