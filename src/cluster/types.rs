use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a storage node.
/// Wrapper around a UUID to ensure global uniqueness across restarts.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Health of a node (and of each partition role it hosts) as judged by the
/// controller's probe loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    /// Accepted into the cluster but never probed yet.
    Uninitialized,
    Healthy,
    Unhealthy,
    /// Posted a registration request; waiting for the operator to accept.
    Unregistered,
}

/// Which side of the replication protocol a node plays for one partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// A node's relationship to one partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRole {
    pub role: Role,
    /// While true the store refuses client reads and writes.
    pub syncing: bool,
    pub status: HealthStatus,
}

impl PartitionRole {
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Eligible to serve client traffic.
    pub fn available(&self) -> bool {
        self.status == HealthStatus::Healthy && !self.syncing
    }
}

/// A storage process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// `host:port` of the node's private HTTP listener (no scheme).
    pub address: String,
    pub status: HealthStatus,
    /// Partition id to the role this node plays for it.
    pub partitions: HashMap<String, PartitionRole>,
}

/// A logical shard. The member list starts with the master.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub id: String,
    pub master: NodeId,
    pub members: Vec<NodeId>,
    /// Set while a reshard that touches this partition is in flight.
    pub migrating: bool,
}

/// A synthetic point on the hash ring owned by a partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualNode {
    pub id: Uuid,
    /// FNV-1a-64 of the stringified id, reinterpreted as signed.
    pub hash: i64,
    pub partition_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MigrationStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// A planned movement of the `(start, end]` slice of the ring from one
/// partition to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationRange {
    pub id: Uuid,
    pub start: i64,
    pub end: i64,
    pub source_partition_id: String,
    pub target_partition_id: String,
    pub status: MigrationStatus,
}

/// The coordination object. The controller owns the authoritative copy;
/// nodes and the load balancer hold snapshots replaced atomically on each
/// dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    pub nodes: Vec<Node>,
    pub unregistered_nodes: Vec<Node>,
    pub partitions: HashMap<String, Partition>,
    /// Kept sorted by `(hash, id)`.
    pub virtual_nodes: Vec<VirtualNode>,
    pub replica_count: usize,
    pub migration_ranges: Vec<MigrationRange>,
    pub resharding: bool,
}

impl ClusterState {
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == *id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == *id)
    }
}

/// Kind of a replicated log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationKind {
    Set,
    Delete,
}

/// One entry of a partition's operation log. Ids are dense, start at 0 and
/// never change once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub key: String,
    /// Present exactly when `kind` is `Set`.
    pub value: Option<String>,
}
