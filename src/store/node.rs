//! All partition stores hosted on one node.
//!
//! The `NodeStore` reconciles its stores against controller snapshots,
//! drives outbound replication through an ordered queue and pulls the
//! missing log tail from the master when a follower detects a gap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::cluster::types::{ClusterState, NodeId, Operation, PartitionRole};
use crate::error::{KvError, Result};
use crate::net::{self, RetryPolicy};
use crate::store::partition::{Applied, PartitionStore};

const REPLICATION_RETRY: RetryPolicy = RetryPolicy::new(Duration::from_millis(500), 3);
const SYNC_RETRY: RetryPolicy = RetryPolicy::new(Duration::from_secs(5), 3);

struct ReplicationJob {
    partition_id: String,
    op: Operation,
}

pub struct NodeStore {
    id: NodeId,
    controller_url: String,
    stores: DashMap<String, Arc<PartitionStore>>,
    state: RwLock<Arc<ClusterState>>,
    last_updated: RwLock<SystemTime>,
    http: reqwest::Client,
    replication_tx: mpsc::UnboundedSender<ReplicationJob>,
    // Taken once by `start`.
    replication_rx: Mutex<Option<mpsc::UnboundedReceiver<ReplicationJob>>>,
}

impl NodeStore {
    pub fn new(id: NodeId, controller_url: String) -> Arc<Self> {
        let (replication_tx, replication_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            controller_url,
            stores: DashMap::new(),
            state: RwLock::new(Arc::new(ClusterState::default())),
            last_updated: RwLock::new(SystemTime::now()),
            http: reqwest::Client::new(),
            replication_tx,
            replication_rx: Mutex::new(Some(replication_rx)),
        })
    }

    /// Spawns the replication worker. A single task drains the queue so
    /// operations leave this node in the order they were appended.
    pub fn start(self: Arc<Self>) {
        let Some(rx) = self.replication_rx.lock().unwrap().take() else {
            return;
        };
        tokio::spawn(async move {
            self.replication_loop(rx).await;
        });
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn snapshot(&self) -> Arc<ClusterState> {
        self.state.read().unwrap().clone()
    }

    pub fn last_updated(&self) -> SystemTime {
        *self.last_updated.read().unwrap()
    }

    /// Reconciles the hosted stores to a new cluster snapshot: creates the
    /// partitions newly assigned to this node, re-roles the retained ones
    /// and drops the rest, then swaps the cached snapshot.
    pub fn set_state(&self, state: ClusterState) -> Result<()> {
        let node = state
            .node(&self.id)
            .ok_or_else(|| KvError::NodeNotFound(self.id.to_string()))?;
        let roles = node.partitions.clone();

        for (partition_id, role) in &roles {
            match self.stores.get(partition_id) {
                Some(store) => store.set_role(role.role, role.syncing),
                None => {
                    self.stores.insert(
                        partition_id.clone(),
                        Arc::new(PartitionStore::new(
                            partition_id.clone(),
                            role.role,
                            role.syncing,
                        )),
                    );
                }
            }
        }
        self.stores.retain(|partition_id, _| roles.contains_key(partition_id));

        *self.state.write().unwrap() = Arc::new(state);
        *self.last_updated.write().unwrap() = SystemTime::now();
        Ok(())
    }

    fn store(&self, partition_id: &str) -> Result<Arc<PartitionStore>> {
        self.stores
            .get(partition_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KvError::PartitionNotFound(partition_id.to_string()))
    }

    pub fn get(&self, partition_id: &str, key: &str) -> Result<Option<String>> {
        self.store(partition_id)?.get(key)
    }

    /// Master write; the operation is queued for asynchronous shipping to
    /// every other member of the partition.
    pub fn set(&self, partition_id: &str, key: String, value: String) -> Result<Operation> {
        let op = self.store(partition_id)?.set(key, value)?;
        self.enqueue_replication(partition_id, op.clone());
        Ok(op)
    }

    /// Master delete. `Ok(None)` means the key was absent.
    pub fn delete(&self, partition_id: &str, key: &str) -> Result<Option<Operation>> {
        let op = self.store(partition_id)?.delete(key)?;
        if let Some(op) = &op {
            self.enqueue_replication(partition_id, op.clone());
        }
        Ok(op)
    }

    pub fn operation(&self, partition_id: &str, op_id: i64) -> Result<Operation> {
        self.store(partition_id)?.operation(op_id)
    }

    pub fn operations_after(&self, partition_id: &str, after: i64) -> Result<Vec<Operation>> {
        self.store(partition_id)?.operations_after(after)
    }

    /// Follower apply. A gap flips the partition into syncing, kicks off a
    /// resync from the master and reports `Syncing` for this operation.
    pub fn apply(&self, partition_id: &str, op: &Operation) -> Result<()> {
        let store = self.store(partition_id)?;
        match store.apply(op)? {
            Applied::Applied => Ok(()),
            Applied::AlreadyApplied => {
                tracing::debug!(partition_id, op_id = op.id, "operation already applied");
                Ok(())
            }
            Applied::Gap { started_sync } => {
                tracing::warn!(
                    partition_id,
                    op_id = op.id,
                    expected = store.next_op_id(),
                    "operation gap detected"
                );
                if started_sync {
                    self.spawn_sync(partition_id, store);
                }
                Err(KvError::Syncing(partition_id.to_string()))
            }
        }
    }

    /// Roles of every hosted partition, reported to the controller.
    pub fn partition_roles(&self) -> HashMap<String, PartitionRole> {
        self.stores
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().partition_role()))
            .collect()
    }

    fn enqueue_replication(&self, partition_id: &str, op: Operation) {
        let job = ReplicationJob {
            partition_id: partition_id.to_string(),
            op,
        };
        if self.replication_tx.send(job).is_err() {
            tracing::error!(partition_id, "replication queue closed, operation not shipped");
        }
    }

    fn spawn_sync(&self, partition_id: &str, store: Arc<PartitionStore>) {
        let job = SyncJob {
            node_id: self.id,
            partition_id: partition_id.to_string(),
            store,
            state: self.snapshot(),
            http: self.http.clone(),
            controller_url: self.controller_url.clone(),
        };
        tokio::spawn(async move {
            job.run().await;
        });
    }

    async fn replication_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ReplicationJob>) {
        while let Some(job) = rx.recv().await {
            self.replicate(job).await;
        }
    }

    /// Ships one operation to every other member of its partition.
    /// Best-effort: failures are logged and convergence is left to resync.
    async fn replicate(&self, job: ReplicationJob) {
        let state = self.snapshot();
        let Some(partition) = state.partitions.get(&job.partition_id) else {
            tracing::warn!(
                partition_id = %job.partition_id,
                "partition vanished before replication"
            );
            return;
        };

        for member in &partition.members {
            if *member == self.id {
                continue;
            }
            let Some(node) = state.node(member) else {
                tracing::warn!(node_id = %member, "replica not present in snapshot");
                continue;
            };

            let url = format!(
                "http://{}/partitions/{}/operations",
                node.address, job.partition_id
            );
            match net::post_json_with_retry(&self.http, &url, &job.op, REPLICATION_RETRY).await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(
                        partition_id = %job.partition_id,
                        op_id = job.op.id,
                        node_id = %member,
                        "operation replicated"
                    );
                }
                Ok(resp) => {
                    tracing::warn!(
                        partition_id = %job.partition_id,
                        op_id = job.op.id,
                        node_id = %member,
                        status = %resp.status(),
                        "replica rejected operation"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        partition_id = %job.partition_id,
                        op_id = job.op.id,
                        node_id = %member,
                        error = %e,
                        "failed to replicate operation"
                    );
                }
            }
        }
    }
}

/// One-shot resync of a follower partition from its master.
struct SyncJob {
    node_id: NodeId,
    partition_id: String,
    store: Arc<PartitionStore>,
    state: Arc<ClusterState>,
    http: reqwest::Client,
    controller_url: String,
}

impl SyncJob {
    async fn run(self) {
        let Some(partition) = self.state.partitions.get(&self.partition_id) else {
            tracing::error!(
                partition_id = %self.partition_id,
                "cannot sync: partition missing from snapshot"
            );
            return;
        };
        let Some(master) = self.state.node(&partition.master) else {
            tracing::error!(
                partition_id = %self.partition_id,
                master = %partition.master,
                "cannot sync: master missing from snapshot"
            );
            return;
        };

        let after = self.store.next_op_id() - 1;
        let url = format!(
            "http://{}/partitions/{}/operations?after={}",
            master.address, self.partition_id, after
        );
        let resp = match net::get_with_retry(&self.http, &url, SYNC_RETRY).await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::error!(
                    partition_id = %self.partition_id,
                    status = %resp.status(),
                    "master refused operation fetch, partition stays syncing"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    partition_id = %self.partition_id,
                    error = %e,
                    "could not reach master, partition stays syncing"
                );
                return;
            }
        };

        let ops: Vec<Operation> = match resp.json().await {
            Ok(ops) => ops,
            Err(e) => {
                tracing::error!(
                    partition_id = %self.partition_id,
                    error = %e,
                    "malformed operation list from master"
                );
                return;
            }
        };

        let count = ops.len();
        for op in &ops {
            match self.store.apply(op) {
                Ok(Applied::Applied) | Ok(Applied::AlreadyApplied) => {}
                Ok(Applied::Gap { .. }) => {
                    tracing::error!(
                        partition_id = %self.partition_id,
                        op_id = op.id,
                        "master returned a non-contiguous log, partition stays syncing"
                    );
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        partition_id = %self.partition_id,
                        op_id = op.id,
                        error = %e,
                        "failed to apply fetched operation, partition stays syncing"
                    );
                    return;
                }
            }
        }

        self.store.finish_sync();
        tracing::info!(
            partition_id = %self.partition_id,
            applied = count,
            "resync from master complete"
        );

        // Best-effort: the controller folds the role change into the next
        // snapshot; a lost notification converges via the health probe.
        let url = format!(
            "{}/nodes/{}/partitions/{}/sync-complete",
            self.controller_url, self.node_id, self.partition_id
        );
        if let Err(e) =
            net::post_json_with_retry(&self.http, &url, &serde_json::json!({}), SYNC_RETRY).await
        {
            tracing::warn!(
                partition_id = %self.partition_id,
                error = %e,
                "could not notify controller of sync completion"
            );
        }
    }
}
