//! Public operation surface over the placement core.
//!
//! The request-routing concerns stay thin here: extract the caller, call the
//! owning service, map typed errors to responses. Session handling and
//! billing live elsewhere; the caller is identified by the `X-User-ID`
//! header the gateway injects.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::cluster::{aggregate, ClusterSnapshot};
use crate::core::errors::FleetResult;
use crate::core::instance::CreateInstanceRequest;
use crate::core::lifecycle::LifecycleController;
use crate::health::{HealthProber, NodeStatus};
use crate::ledger::{PortLedger, PortUsage, QuotaCounters, QuotaLedger};
use crate::registry::{Node, NodeRegistry, NodeRole};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub registry: Arc<NodeRegistry>,
    pub prober: Arc<HealthProber>,
    pub quota: Arc<QuotaLedger>,
    pub ports: Arc<PortLedger>,
    pub cluster_name: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/instances", post(create_instance).get(list_instances))
        .route("/api/v1/instances/summary", get(instance_summary))
        .route("/api/v1/instances/{id}", get(get_instance).delete(terminate_instance))
        .route("/api/v1/instances/{id}/stop", post(stop_instance))
        .route("/api/v1/instances/{id}/start", post(start_instance))
        .route("/api/v1/quota", get(quota_usage))
        .route("/api/v1/cluster/status", get(cluster_status))
        .route("/api/v1/nodes", get(list_nodes).post(add_node))
        .route(
            "/api/v1/nodes/{id}",
            get(get_node).put(update_node).delete(delete_node),
        )
        .route("/api/v1/nodes/{id}/health", get(node_health))
        .route("/api/v1/nodes/{id}/ports", get(node_ports))
        .with_state(state)
}

/// The gateway authenticates and forwards the user id; absent header means
/// the demo user, matching the portal's single-tenant dev mode.
fn user_id(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("user-demo-001")
        .to_string()
}

async fn create_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateInstanceRequest>,
) -> FleetResult<impl IntoResponse> {
    let user = user_id(&headers);
    state.quota.register_user(&user);
    let instance = state.controller.create(&user, request).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<crate::core::instance::InstanceStatus>,
}

async fn list_instances(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let mut instances = state.controller.list(&user_id(&headers)).await;
    if let Some(status) = query.status {
        instances.retain(|i| i.status == status);
    }
    Json(instances)
}

async fn instance_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(state.controller.summary(&user_id(&headers)).await)
}

async fn get_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    let instance = state.controller.get(&user_id(&headers), &id).await?;
    Ok(Json(instance))
}

async fn stop_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    let instance = state.controller.stop(&user_id(&headers), &id).await?;
    Ok(Json(instance))
}

async fn start_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    let instance = state.controller.start(&user_id(&headers), &id).await?;
    Ok(Json(instance))
}

async fn terminate_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    state.controller.terminate(&user_id(&headers), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn quota_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<QuotaCounters> {
    Json(state.quota.usage(&user_id(&headers)).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct ClusterQuery {
    #[serde(default)]
    include_nodes: bool,
}

async fn cluster_status(
    State(state): State<AppState>,
    Query(query): Query<ClusterQuery>,
) -> Json<ClusterSnapshot> {
    let statuses = state.prober.probe_all().await;
    Json(aggregate(&state.cluster_name, statuses, query.include_nodes))
}

#[derive(Debug, Deserialize)]
struct NodeListQuery {
    role: Option<NodeRole>,
}

async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<NodeListQuery>,
) -> Json<Vec<Node>> {
    Json(state.registry.list(query.role).await)
}

async fn add_node(
    State(state): State<AppState>,
    Json(node): Json<Node>,
) -> FleetResult<impl IntoResponse> {
    let node = state.registry.add(node).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    Ok(Json(state.registry.get(&id).await?))
}

async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(node): Json<Node>,
) -> FleetResult<impl IntoResponse> {
    Ok(Json(state.registry.update(&id, node).await?))
}

async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn node_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> FleetResult<Json<NodeStatus>> {
    let node = state.registry.get(&id).await?;
    Ok(Json(state.prober.probe(&node).await))
}

async fn node_ports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> FleetResult<Json<PortUsage>> {
    // 404 for unregistered nodes rather than an empty report.
    state.registry.get(&id).await?;
    Ok(Json(state.ports.usage(&id)))
}
