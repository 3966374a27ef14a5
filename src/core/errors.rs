use thiserror::Error;

/// Error taxonomy for the placement and bookkeeping core.
///
/// Expected outcomes (capacity shortfall, missing records, state conflicts)
/// are ordinary variants the API layer maps to responses; `Persistence` is a
/// retryable service fault. Probe failures never appear here — they are
/// absorbed into per-node status records.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Also returned when a record exists but belongs to another user, so
    /// ownership cannot be probed through error responses.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error(
        "insufficient capacity: requested {requested_cpu} vCPU / {requested_memory} GB, \
         max available {max_cpu} vCPU / {max_memory} GB"
    )]
    InsufficientCapacity {
        requested_cpu: u32,
        requested_memory: u32,
        max_cpu: u32,
        max_memory: u32,
    },

    /// Reserved for a future hard-cap policy; the current accounting mode
    /// never produces it.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("deployment failed on {address}: {message}")]
    DeploymentFailure { address: String, message: String },

    #[error("no free ports on node {node_id}")]
    PortExhausted { node_id: String },

    #[error("instance {id} is {status}, cannot {operation}")]
    InvalidState {
        id: String,
        status: String,
        operation: &'static str,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl FleetError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        Self::Persistence(err.into())
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
