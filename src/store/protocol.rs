//! Node Network Protocol
//!
//! Endpoint paths and Data Transfer Objects of a storage node's private
//! HTTP listener. The controller pushes snapshots here, peers push
//! replicated operations, and the load balancer forwards client traffic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cluster::types::{NodeId, PartitionRole};

// --- API Endpoints ---

/// Cluster snapshot push (controller to node) and role report (node to controller).
pub const ENDPOINT_STATE: &str = "/state";
/// Client-facing key access, forwarded by the load balancer.
pub const ENDPOINT_PARTITION_KEY: &str = "/partitions/:partition_id/keys/:key";
/// Log reads during follower resync, plus the replication push.
pub const ENDPOINT_PARTITION_OPERATIONS: &str = "/partitions/:partition_id/operations";
/// Single log entry lookup.
pub const ENDPOINT_PARTITION_OPERATION: &str = "/partitions/:partition_id/operations/:op_id";

// --- Data Transfer Objects ---

/// Body of a `PUT .../keys/{key}` request.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetValueRequest {
    pub value: String,
}

/// Successful read or write of a key.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: String,
}

/// Successful delete of a key.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub key: String,
    pub deleted: bool,
}

/// What a node reports about itself on `GET /state`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStateResponse {
    pub node_id: NodeId,
    pub partitions: HashMap<String, PartitionRole>,
}

/// Query string of `GET .../operations?after={id}`.
#[derive(Debug, Deserialize)]
pub struct OperationsAfterQuery {
    pub after: i64,
}
