//! Node API Handlers
//!
//! HTTP endpoints that expose the `NodeStore` to the rest of the cluster.
//! They translate requests into storage calls and map the error taxonomy
//! onto status codes; the routing decisions themselves live elsewhere.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::Json;

use super::node::NodeStore;
use super::protocol::{
    DeleteResponse, KeyValueResponse, NodeStateResponse, OperationsAfterQuery, SetValueRequest,
};
use crate::cluster::types::{ClusterState, Operation};
use crate::error::KvError;

/// Reports this node's identity and the role it plays for each hosted
/// partition. Doubles as the controller's health probe target.
pub async fn handle_get_state(
    Extension(node): Extension<Arc<NodeStore>>,
) -> Json<NodeStateResponse> {
    Json(NodeStateResponse {
        node_id: node.id(),
        partitions: node.partition_roles(),
    })
}

/// Accepts a cluster snapshot pushed by the controller.
pub async fn handle_set_state(
    Extension(node): Extension<Arc<NodeStore>>,
    Json(state): Json<ClusterState>,
) -> Result<StatusCode, KvError> {
    node.set_state(state)?;
    Ok(StatusCode::OK)
}

pub async fn handle_get_value(
    Extension(node): Extension<Arc<NodeStore>>,
    Path((partition_id, key)): Path<(String, String)>,
) -> Result<Json<KeyValueResponse>, KvError> {
    match node.get(&partition_id, &key)? {
        Some(value) => Ok(Json(KeyValueResponse { key, value })),
        None => Err(KvError::KeyNotFound(key)),
    }
}

pub async fn handle_set_value(
    Extension(node): Extension<Arc<NodeStore>>,
    Path((partition_id, key)): Path<(String, String)>,
    Json(req): Json<SetValueRequest>,
) -> Result<Json<KeyValueResponse>, KvError> {
    node.set(&partition_id, key.clone(), req.value.clone())?;
    Ok(Json(KeyValueResponse {
        key,
        value: req.value,
    }))
}

pub async fn handle_delete_key(
    Extension(node): Extension<Arc<NodeStore>>,
    Path((partition_id, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, KvError> {
    match node.delete(&partition_id, &key)? {
        Some(_) => Ok(Json(DeleteResponse { key, deleted: true })),
        None => Err(KvError::KeyNotFound(key)),
    }
}

pub async fn handle_get_operation(
    Extension(node): Extension<Arc<NodeStore>>,
    Path((partition_id, op_id)): Path<(String, i64)>,
) -> Result<Json<Operation>, KvError> {
    Ok(Json(node.operation(&partition_id, op_id)?))
}

pub async fn handle_get_operations(
    Extension(node): Extension<Arc<NodeStore>>,
    Path(partition_id): Path<String>,
    Query(query): Query<OperationsAfterQuery>,
) -> Result<Json<Vec<Operation>>, KvError> {
    Ok(Json(node.operations_after(&partition_id, query.after)?))
}

/// Replication push from a partition master.
pub async fn handle_apply_operation(
    Extension(node): Extension<Arc<NodeStore>>,
    Path(partition_id): Path<String>,
    Json(op): Json<Operation>,
) -> Result<StatusCode, KvError> {
    node.apply(&partition_id, &op)?;
    Ok(StatusCode::OK)
}
