pub mod errors;
pub mod instance;
pub mod lifecycle;

pub use errors::{FleetError, FleetResult};
pub use instance::{CreateInstanceRequest, Instance, InstanceStatus, InstanceStore};
pub use lifecycle::LifecycleController;
