//! Load Balancer API Handlers
//!
//! Public `/kv/{key}` surface for clients plus the private state intake.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;

use super::core::LoadBalancer;
use crate::cluster::types::ClusterState;
use crate::controller::protocol::{RegisterNodeRequest, RegisterNodeResponse};
use crate::error::KvError;
use crate::store::protocol::{DeleteResponse, KeyValueResponse, SetValueRequest};

pub async fn handle_get_key(
    Extension(balancer): Extension<Arc<LoadBalancer>>,
    Path(key): Path<String>,
) -> Result<Json<KeyValueResponse>, KvError> {
    Ok(Json(balancer.get(&key).await?))
}

pub async fn handle_put_key(
    Extension(balancer): Extension<Arc<LoadBalancer>>,
    Path(key): Path<String>,
    Json(req): Json<SetValueRequest>,
) -> Result<Json<KeyValueResponse>, KvError> {
    Ok(Json(balancer.set(&key, req.value).await?))
}

pub async fn handle_delete_key(
    Extension(balancer): Extension<Arc<LoadBalancer>>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, KvError> {
    Ok(Json(balancer.delete(&key).await?))
}

/// Snapshot push from the controller.
pub async fn handle_set_state(
    Extension(balancer): Extension<Arc<LoadBalancer>>,
    Json(state): Json<ClusterState>,
) -> StatusCode {
    balancer.set_state(state);
    StatusCode::OK
}

/// Registration pass-through.
pub async fn handle_register_node(
    Extension(balancer): Extension<Arc<LoadBalancer>>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, KvError> {
    Ok(Json(balancer.register_node(req).await?))
}
