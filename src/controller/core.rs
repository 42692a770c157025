//! The controller itself: state ownership, registry, assignment, health
//! probing and snapshot dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::seq::{IteratorRandom, SliceRandom};
use tokio::sync::watch;
use uuid::Uuid;

use crate::cluster::ring;
use crate::cluster::types::{
    ClusterState, HealthStatus, MigrationRange, MigrationStatus, Node, NodeId, Partition,
    PartitionRole, Role,
};
use crate::error::{KvError, Result};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Controller {
    state: RwLock<ClusterState>,
    http: reqwest::Client,
    balancer_url: String,
    virtual_node_count: usize,
    health_check_interval: Duration,
    health_check_timeout: Duration,
    worker_started: AtomicBool,
    stop_tx: watch::Sender<bool>,
    started_at: Instant,
}

impl Controller {
    pub fn new(
        virtual_node_count: usize,
        health_check_interval: Duration,
        health_check_timeout: Duration,
        balancer_url: String,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: RwLock::new(ClusterState::default()),
            http: reqwest::Client::new(),
            balancer_url,
            virtual_node_count,
            health_check_interval,
            health_check_timeout,
            worker_started: AtomicBool::new(false),
            stop_tx,
            started_at: Instant::now(),
        })
    }

    pub fn get_state(&self) -> ClusterState {
        self.state.read().unwrap().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    // ------------------------------------------------------------
    // Node registry
    // ------------------------------------------------------------

    /// A node announces itself. It waits in the pending list until the
    /// operator accepts it.
    pub fn register_node_by_address(&self, address: String) -> Result<NodeId> {
        let mut state = self.state.write().unwrap();

        let taken = state
            .nodes
            .iter()
            .chain(state.unregistered_nodes.iter())
            .any(|n| n.address == address);
        if taken {
            return Err(KvError::NodeExists(address));
        }

        let id = NodeId::new();
        state.unregistered_nodes.push(Node {
            id,
            address: address.clone(),
            status: HealthStatus::Unregistered,
            partitions: Default::default(),
        });
        tracing::info!(node_id = %id, address = %address, "node registered, awaiting acceptance");
        Ok(id)
    }

    /// Operator accepts a pending node into the cluster.
    pub fn accept_node(&self, id: NodeId) -> Result<NodeId> {
        let mut state = self.state.write().unwrap();

        let idx = state
            .unregistered_nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| KvError::NodeNotFound(id.to_string()))?;

        let address = state.unregistered_nodes[idx].address.clone();
        if state.nodes.iter().any(|n| n.address == address) {
            return Err(KvError::NodeExists(address));
        }

        let mut node = state.unregistered_nodes.remove(idx);
        node.status = HealthStatus::Uninitialized;
        node.partitions.clear();
        state.nodes.push(node);
        tracing::info!(node_id = %id, "node accepted into the cluster");
        Ok(id)
    }

    /// Removes a node. Partitions it hosted lose the member; the first
    /// surviving member is promoted when the master goes away, and a
    /// syncing replacement replica is recruited to restore the replication
    /// factor. Promotion happens only on this explicit operator action.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().unwrap();

            let idx = state
                .nodes
                .iter()
                .position(|n| n.id == id)
                .ok_or_else(|| KvError::NodeNotFound(id.to_string()))?;
            let removed = state.nodes.remove(idx);
            let hosted: Vec<String> = removed.partitions.keys().cloned().collect();

            for partition_id in &hosted {
                repair_partition_after_removal(&mut state, partition_id, &id);
            }

            tracing::info!(node_id = %id, hosted = hosted.len(), "node removed");
            state.clone()
        };
        self.spawn_dispatch(snapshot);
        Ok(())
    }

    // ------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------

    /// Grows or shrinks the partition set to `target`, emitting the
    /// migration plan for the affected ring ranges.
    pub fn set_partition_count(&self, target: usize) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().unwrap();

            if target == 0 {
                return Err(KvError::InvalidArgument(
                    "partition count must be greater than 0".to_string(),
                ));
            }
            if state.nodes.is_empty() {
                return Err(KvError::PreconditionFailed("no registered nodes".to_string()));
            }
            let current = state.partitions.len();
            if current == target {
                return Ok(());
            }
            if state.nodes.len() < state.replica_count + 1 {
                return Err(KvError::PreconditionFailed(format!(
                    "{} nodes cannot sustain replica count {}",
                    state.nodes.len(),
                    state.replica_count
                )));
            }

            state.resharding = current != 0;

            if current < target {
                for _ in current..target {
                    add_partition(&mut state, target, self.virtual_node_count)?;
                }
            } else {
                let doomed: Vec<String> = {
                    let mut rng = rand::thread_rng();
                    state
                        .partitions
                        .keys()
                        .cloned()
                        .choose_multiple(&mut rng, current - target)
                };
                for partition_id in &doomed {
                    remove_partition(&mut state, partition_id);
                }
            }

            if state.resharding {
                for partition in state.partitions.values_mut() {
                    partition.migrating = true;
                }
            }

            tracing::info!(
                partitions = state.partitions.len(),
                resharding = state.resharding,
                migration_ranges = state.migration_ranges.len(),
                "partition count updated"
            );
            state.clone()
        };
        self.spawn_dispatch(snapshot);
        Ok(())
    }

    /// Updates the replication factor. No immediate data movement: future
    /// partition creations observe the new factor.
    pub fn set_replica_count(&self, count: usize) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if count >= state.nodes.len() {
            return Err(KvError::PreconditionFailed(
                "replica count must be less than the node count".to_string(),
            ));
        }
        state.replica_count = count;
        tracing::info!(replica_count = count, "replica count updated");
        Ok(())
    }

    /// Advances one migration range. When every range is completed the
    /// reshard is over: the flag clears, partitions stop migrating and the
    /// plan is dropped.
    pub fn set_migration_status(&self, range_id: Uuid, status: MigrationStatus) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().unwrap();

            let range = state
                .migration_ranges
                .iter_mut()
                .find(|r| r.id == range_id)
                .ok_or(KvError::MigrationRangeNotFound(range_id))?;
            range.status = status;

            let done = !state.migration_ranges.is_empty()
                && state
                    .migration_ranges
                    .iter()
                    .all(|r| r.status == MigrationStatus::Completed);
            if done {
                state.resharding = false;
                state.migration_ranges.clear();
                for partition in state.partitions.values_mut() {
                    partition.migrating = false;
                }
                tracing::info!("all migration ranges completed, reshard finished");
            }

            state.clone()
        };
        self.spawn_dispatch(snapshot);
        Ok(())
    }

    /// A follower finished its resync; fold the role change back into the
    /// authoritative state.
    pub fn mark_sync_complete(&self, node_id: NodeId, partition_id: &str) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().unwrap();
            let node = state
                .node_mut(&node_id)
                .ok_or_else(|| KvError::NodeNotFound(node_id.to_string()))?;
            let role = node
                .partitions
                .get_mut(partition_id)
                .ok_or_else(|| KvError::PartitionNotFound(partition_id.to_string()))?;
            role.syncing = false;
            tracing::info!(node_id = %node_id, partition_id, "partition finished syncing");
            state.clone()
        };
        self.spawn_dispatch(snapshot);
        Ok(())
    }

    // ------------------------------------------------------------
    // Health worker
    // ------------------------------------------------------------

    /// Launches the probe loop. Idempotent: only the first call spawns.
    pub fn start(self: Arc<Self>) {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            self.health_loop().await;
        });
    }

    /// Signals the probe loop to stop; it exits within one tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn health_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.health_check_interval);
        let mut stop_rx = self.stop_tx.subscribe();
        tracing::info!(
            interval_secs = self.health_check_interval.as_secs(),
            "health check worker started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => self.check_nodes().await,
                _ = stop_rx.changed() => {
                    tracing::info!("health check worker stopping");
                    return;
                }
            }
        }
    }

    /// Probes every registered node in parallel, then folds all results
    /// into the state under a single lock acquisition so one consistent
    /// snapshot comes out of the batch.
    async fn check_nodes(&self) {
        let targets: Vec<(NodeId, String)> = {
            let state = self.state.read().unwrap();
            state
                .nodes
                .iter()
                .map(|n| (n.id, n.address.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let mut probes = Vec::with_capacity(targets.len());
        for (id, address) in targets {
            let http = self.http.clone();
            let timeout = self.health_check_timeout;
            probes.push(tokio::spawn(async move {
                (id, probe_node(&http, &address, timeout).await)
            }));
        }

        let mut results = Vec::with_capacity(probes.len());
        for probe in probes {
            if let Ok(result) = probe.await {
                results.push(result);
            }
        }

        let snapshot = {
            let mut state = self.state.write().unwrap();
            for (id, healthy) in results {
                let Some(node) = state.node_mut(&id) else {
                    continue;
                };
                let status = if healthy {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                };
                node.status = status;
                for role in node.partitions.values_mut() {
                    role.status = status;
                }
            }
            state.clone()
        };
        self.dispatch(snapshot).await;
    }

    // ------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------

    fn spawn_dispatch(&self, snapshot: ClusterState) {
        let http = self.http.clone();
        let balancer_url = self.balancer_url.clone();
        tokio::spawn(async move {
            dispatch_state(&http, &balancer_url, snapshot).await;
        });
    }

    async fn dispatch(&self, snapshot: ClusterState) {
        dispatch_state(&self.http, &self.balancer_url, snapshot).await;
    }
}

async fn probe_node(http: &reqwest::Client, address: &str, timeout: Duration) -> bool {
    let url = format!("http://{}/state", address);
    match http.get(&url).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            tracing::warn!(address, status = %resp.status(), "health probe refused");
            false
        }
        Err(e) => {
            tracing::warn!(address, error = %e, "health probe failed");
            false
        }
    }
}

/// Pushes a snapshot to every node and then to the load balancer.
/// Best-effort: per-recipient failures are logged, never rolled back; the
/// next health probe converges divergent recipients.
async fn dispatch_state(http: &reqwest::Client, balancer_url: &str, snapshot: ClusterState) {
    for node in &snapshot.nodes {
        let url = format!("http://{}/state", node.address);
        match http
            .post(&url)
            .json(&snapshot)
            .timeout(DISPATCH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(node_id = %node.id, "state dispatched");
            }
            Ok(resp) => {
                tracing::warn!(node_id = %node.id, status = %resp.status(), "node refused state");
            }
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "could not dispatch state to node");
            }
        }
    }

    let url = format!("{}/state", balancer_url);
    match http
        .post(&url)
        .json(&snapshot)
        .timeout(DISPATCH_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!("state dispatched to load balancer");
        }
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "load balancer refused state");
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not dispatch state to load balancer");
        }
    }
}

// ------------------------------------------------------------
// State transitions
// ------------------------------------------------------------

fn add_partition(state: &mut ClusterState, target: usize, virtual_node_count: usize) -> Result<()> {
    let partition_id = Uuid::new_v4().to_string();

    let members: Vec<NodeId> = if state.partitions.is_empty() {
        // The first partition lands on every node.
        state.nodes.iter().map(|n| n.id).collect()
    } else {
        let cap = target.div_ceil(state.nodes.len());
        let under_cap: Vec<NodeId> = state
            .nodes
            .iter()
            .filter(|n| n.partitions.len() < cap)
            .map(|n| n.id)
            .collect();
        let wanted = state.replica_count + 1;
        let mut members: Vec<NodeId> = if under_cap.len() >= wanted {
            let mut rng = rand::thread_rng();
            under_cap
                .choose_multiple(&mut rng, wanted)
                .copied()
                .collect()
        } else {
            // The cap leaves too few candidates once partitions roughly
            // match the node count; fill up from the least-loaded rest.
            let mut members = under_cap;
            let mut rest: Vec<(usize, NodeId)> = state
                .nodes
                .iter()
                .filter(|n| !members.contains(&n.id))
                .map(|n| (n.partitions.len(), n.id))
                .collect();
            rest.sort();
            members.extend(rest.into_iter().take(wanted - members.len()).map(|(_, id)| id));
            members
        };
        if members.len() < wanted {
            return Err(KvError::PreconditionFailed(format!(
                "only {} candidate nodes, need {}",
                members.len(),
                wanted
            )));
        }
        members.truncate(wanted);
        members
    };

    let master = members[0];
    state.partitions.insert(
        partition_id.clone(),
        Partition {
            id: partition_id.clone(),
            master,
            members: members.clone(),
            migrating: false,
        },
    );

    let syncing = state.resharding;
    for (i, member) in members.iter().enumerate() {
        if let Some(node) = state.node_mut(member) {
            node.partitions.insert(
                partition_id.clone(),
                PartitionRole {
                    role: if i == 0 { Role::Master } else { Role::Replica },
                    syncing,
                    status: node.status,
                },
            );
        }
    }

    let mut virtual_nodes = ring::generate_virtual_nodes(&partition_id, virtual_node_count);
    state.virtual_nodes.append(&mut virtual_nodes);
    ring::sort_virtual_nodes(&mut state.virtual_nodes);

    if state.resharding {
        create_ranges_for_new_partition(state, &partition_id);
    }

    tracing::debug!(%partition_id, master = %master, members = members.len(), "partition created");
    Ok(())
}

fn remove_partition(state: &mut ClusterState, partition_id: &str) {
    create_ranges_for_removed_partition(state, partition_id);

    state
        .virtual_nodes
        .retain(|vn| vn.partition_id != partition_id);

    if let Some(partition) = state.partitions.get(partition_id) {
        let members = partition.members.clone();
        for member in members {
            if let Some(node) = state.node_mut(&member) {
                node.partitions.remove(partition_id);
            }
        }
    }
    state.partitions.remove(partition_id);
    tracing::debug!(partition_id, "partition removed");
}

/// For each virtual node of the new partition, the slice between its ring
/// predecessor and itself moves from the predecessor's partition.
fn create_ranges_for_new_partition(state: &mut ClusterState, new_partition_id: &str) {
    let mut ranges = Vec::new();
    let virtual_nodes = &state.virtual_nodes;
    for (idx, vn) in virtual_nodes.iter().enumerate() {
        if vn.partition_id != new_partition_id {
            continue;
        }
        let prev = if idx == 0 {
            virtual_nodes.last()
        } else {
            virtual_nodes.get(idx - 1)
        };
        let Some(prev) = prev else { continue };
        if prev.partition_id == new_partition_id {
            continue;
        }
        ranges.push(MigrationRange {
            id: Uuid::new_v4(),
            start: prev.hash,
            end: vn.hash,
            source_partition_id: prev.partition_id.clone(),
            target_partition_id: new_partition_id.to_string(),
            status: MigrationStatus::NotStarted,
        });
    }
    state.migration_ranges.extend(ranges);
}

/// For each virtual node of the removed partition, the slice it owned
/// (from the nearest preceding foreign virtual node) is ceded to the next
/// foreign partition on the ring.
fn create_ranges_for_removed_partition(state: &mut ClusterState, removed_partition_id: &str) {
    let mut ranges = Vec::new();
    let virtual_nodes = &state.virtual_nodes;
    for (idx, vn) in virtual_nodes.iter().enumerate() {
        if vn.partition_id != removed_partition_id {
            continue;
        }
        let prev = cyclic_neighbor(virtual_nodes, idx, Direction::Backward, removed_partition_id);
        let next = cyclic_neighbor(virtual_nodes, idx, Direction::Forward, removed_partition_id);
        let (Some(prev), Some(next)) = (prev, next) else {
            // Every virtual node belongs to the removed partition: nowhere
            // to cede the range to.
            continue;
        };
        ranges.push(MigrationRange {
            id: Uuid::new_v4(),
            start: prev.hash,
            end: vn.hash,
            source_partition_id: removed_partition_id.to_string(),
            target_partition_id: next.partition_id.clone(),
            status: MigrationStatus::NotStarted,
        });
    }
    state.migration_ranges.extend(ranges);
}

enum Direction {
    Forward,
    Backward,
}

/// Nearest virtual node around `idx` (cyclically) not owned by `excluded`.
fn cyclic_neighbor<'a>(
    virtual_nodes: &'a [crate::cluster::types::VirtualNode],
    idx: usize,
    direction: Direction,
    excluded: &str,
) -> Option<&'a crate::cluster::types::VirtualNode> {
    let n = virtual_nodes.len();
    for step in 1..n {
        let candidate = match direction {
            Direction::Forward => &virtual_nodes[(idx + step) % n],
            Direction::Backward => &virtual_nodes[(idx + n - step) % n],
        };
        if candidate.partition_id != excluded {
            return Some(candidate);
        }
    }
    None
}

/// Drops the removed node from a partition, promotes a survivor when the
/// master is gone and recruits the least-loaded outsiders back up to the
/// replication factor.
fn repair_partition_after_removal(state: &mut ClusterState, partition_id: &str, removed: &NodeId) {
    let Some(partition) = state.partitions.get_mut(partition_id) else {
        return;
    };
    partition.members.retain(|m| m != removed);

    if partition.master == *removed {
        match partition.members.first().copied() {
            Some(successor) => {
                partition.master = successor;
                if let Some(node) = state.nodes.iter_mut().find(|n| n.id == successor) {
                    if let Some(role) = node.partitions.get_mut(partition_id) {
                        role.role = Role::Master;
                    }
                }
                tracing::info!(partition_id, master = %successor, "master promoted");
            }
            None => {
                tracing::error!(
                    partition_id,
                    "partition lost its last member, data is gone"
                );
            }
        }
    }

    restore_membership(state, partition_id);
}

fn restore_membership(state: &mut ClusterState, partition_id: &str) {
    let target = state.replica_count + 1;
    let members = match state.partitions.get(partition_id) {
        Some(p) => p.members.clone(),
        None => return,
    };
    if members.is_empty() || members.len() >= target {
        return;
    }

    let mut candidates: Vec<(usize, NodeId)> = state
        .nodes
        .iter()
        .filter(|n| !members.contains(&n.id))
        .map(|n| (n.partitions.len(), n.id))
        .collect();
    candidates.sort();

    let recruits: Vec<NodeId> = candidates
        .into_iter()
        .take(target - members.len())
        .map(|(_, id)| id)
        .collect();

    for recruit in recruits {
        if let Some(partition) = state.partitions.get_mut(partition_id) {
            partition.members.push(recruit);
        }
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == recruit) {
            node.partitions.insert(
                partition_id.to_string(),
                PartitionRole {
                    role: Role::Replica,
                    syncing: true,
                    status: node.status,
                },
            );
            tracing::info!(partition_id, node_id = %recruit, "replacement replica recruited");
        }
    }
}
