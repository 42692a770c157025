//! Controller Network Protocol
//!
//! Endpoint paths and DTOs for both controller listeners: the private one
//! peers talk to (registration, sync notifications, state reads) and the
//! public admin one operators drive the topology through.

use serde::{Deserialize, Serialize};

use crate::cluster::types::{HealthStatus, MigrationStatus, NodeId};

// --- Private API endpoints ---

pub const ENDPOINT_STATE: &str = "/state";
pub const ENDPOINT_REGISTER: &str = "/nodes/register";
pub const ENDPOINT_SYNC_COMPLETE: &str = "/nodes/:node_id/partitions/:partition_id/sync-complete";

// --- Admin API endpoints ---

pub const ENDPOINT_ACCEPT_NODE: &str = "/nodes/:node_id/accept";
pub const ENDPOINT_NODE: &str = "/nodes/:node_id";
pub const ENDPOINT_PARTITION_COUNT: &str = "/partitions/count";
pub const ENDPOINT_REPLICA_COUNT: &str = "/replicas/count";
pub const ENDPOINT_MIGRATION_STATUS: &str = "/migrations/:range_id/status";

// --- Data Transfer Objects ---

/// A node announcing itself, directly or through the load balancer.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub id: NodeId,
    pub status: HealthStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptNodeResponse {
    pub id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionCountRequest {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicaCountRequest {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationStatusRequest {
    pub status: MigrationStatus,
}
