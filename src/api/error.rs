use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::core::errors::FleetError;

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = match &self {
            FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::InvalidState { .. } => StatusCode::CONFLICT,
            FleetError::InsufficientCapacity { .. } => StatusCode::CONFLICT,
            FleetError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            FleetError::PortExhausted { .. } => StatusCode::CONFLICT,
            FleetError::DeploymentFailure { .. } => StatusCode::BAD_GATEWAY,
            // Retryable: the store hiccuped, nothing about the request was
            // wrong.
            FleetError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
