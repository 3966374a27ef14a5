pub mod api;
pub mod cluster;
pub mod config;
pub mod core;
pub mod deploy;
pub mod health;
pub mod ledger;
pub mod registry;
pub mod scheduler;

// Re-exports
pub use api::routes::{create_router, AppState};
pub use cluster::{aggregate, ClusterHealth, ClusterSnapshot};
pub use crate::core::errors::{FleetError, FleetResult};
pub use crate::core::instance::{CreateInstanceRequest, Instance, InstanceStatus, InstanceStore};
pub use crate::core::lifecycle::LifecycleController;
pub use deploy::{Deployment, DockerDeployer};
pub use health::{HealthProber, NodeHealth, NodeStatus, NodeWithStatus};
pub use ledger::{PortLedger, QuotaLedger};
pub use registry::{Node, NodeRegistry, NodeRole};
pub use scheduler::{CapacityFeed, CapacityScheduler, NodeCapacity, Placement};
