//! Controller API Handlers

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::core::Controller;
use super::protocol::{
    AcceptNodeResponse, MigrationStatusRequest, PartitionCountRequest, RegisterNodeRequest,
    RegisterNodeResponse, ReplicaCountRequest,
};
use crate::cluster::types::{ClusterState, HealthStatus, NodeId};
use crate::error::KvError;

pub async fn handle_get_state(
    Extension(controller): Extension<Arc<Controller>>,
) -> Json<ClusterState> {
    Json(controller.get_state())
}

pub async fn handle_register_node(
    Extension(controller): Extension<Arc<Controller>>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, KvError> {
    let id = controller.register_node_by_address(req.address)?;
    Ok(Json(RegisterNodeResponse {
        id,
        status: HealthStatus::Unregistered,
    }))
}

pub async fn handle_accept_node(
    Extension(controller): Extension<Arc<Controller>>,
    Path(node_id): Path<NodeId>,
) -> Result<Json<AcceptNodeResponse>, KvError> {
    let id = controller.accept_node(node_id)?;
    Ok(Json(AcceptNodeResponse { id }))
}

pub async fn handle_remove_node(
    Extension(controller): Extension<Arc<Controller>>,
    Path(node_id): Path<NodeId>,
) -> Result<StatusCode, KvError> {
    controller.remove_node(node_id)?;
    Ok(StatusCode::OK)
}

pub async fn handle_set_partition_count(
    Extension(controller): Extension<Arc<Controller>>,
    Json(req): Json<PartitionCountRequest>,
) -> Result<StatusCode, KvError> {
    controller.set_partition_count(req.count)?;
    Ok(StatusCode::OK)
}

pub async fn handle_set_replica_count(
    Extension(controller): Extension<Arc<Controller>>,
    Json(req): Json<ReplicaCountRequest>,
) -> Result<StatusCode, KvError> {
    controller.set_replica_count(req.count)?;
    Ok(StatusCode::OK)
}

pub async fn handle_set_migration_status(
    Extension(controller): Extension<Arc<Controller>>,
    Path(range_id): Path<Uuid>,
    Json(req): Json<MigrationStatusRequest>,
) -> Result<StatusCode, KvError> {
    controller.set_migration_status(range_id, req.status)?;
    Ok(StatusCode::OK)
}

pub async fn handle_sync_complete(
    Extension(controller): Extension<Arc<Controller>>,
    Path((node_id, partition_id)): Path<(NodeId, String)>,
) -> Result<StatusCode, KvError> {
    controller.mark_sync_complete(node_id, &partition_id)?;
    Ok(StatusCode::OK)
}
