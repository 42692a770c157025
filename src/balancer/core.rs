//! Routing logic and request forwarding.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;

use crate::cluster::types::ClusterState;
use crate::controller::protocol::{RegisterNodeRequest, RegisterNodeResponse};
use crate::error::{KvError, Result};
use crate::net::{self, RetryPolicy};
use crate::store::protocol::{DeleteResponse, KeyValueResponse, SetValueRequest};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);
const FORWARD_RETRY: RetryPolicy = RetryPolicy::new(FORWARD_TIMEOUT, 2);

pub struct LoadBalancer {
    // The guard is held only to clone the pointer; the request path works
    // on an immutable snapshot.
    state: RwLock<Arc<ClusterState>>,
    http: reqwest::Client,
    controller_url: String,
}

impl LoadBalancer {
    pub fn new(controller_url: String) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(Arc::new(ClusterState::default())),
            http: reqwest::Client::new(),
            controller_url,
        })
    }

    /// Snapshot intake from the controller.
    pub fn set_state(&self, state: ClusterState) {
        *self.state.write().unwrap() = Arc::new(state);
        tracing::debug!("cluster state replaced");
    }

    pub fn snapshot(&self) -> Arc<ClusterState> {
        self.state.read().unwrap().clone()
    }

    /// Picks the master node for the key's partition, requiring a healthy,
    /// non-syncing master role. Returns `(address, partition_id)`.
    pub(crate) fn route_write(state: &ClusterState, key: &str) -> Result<(String, String)> {
        let partition = state.partition_for_key(key)?;
        let master = state
            .node(&partition.master)
            .ok_or_else(|| KvError::PartitionUnavailable(partition.id.clone()))?;
        let role = master
            .partitions
            .get(&partition.id)
            .ok_or_else(|| KvError::PartitionUnavailable(partition.id.clone()))?;
        if !role.is_master() || !role.available() {
            return Err(KvError::PartitionUnavailable(partition.id.clone()));
        }
        Ok((master.address.clone(), partition.id.clone()))
    }

    /// Picks a healthy, non-syncing replica of the key's partition at
    /// random. Returns `(address, partition_id)`.
    pub(crate) fn route_read(state: &ClusterState, key: &str) -> Result<(String, String)> {
        let partition = state.partition_for_key(key)?;
        let healthy: Vec<&str> = state
            .nodes
            .iter()
            .filter_map(|node| {
                node.partitions
                    .get(&partition.id)
                    .filter(|role| role.available())
                    .map(|_| node.address.as_str())
            })
            .collect();
        if healthy.is_empty() {
            return Err(KvError::ReplicaUnavailable(partition.id.clone()));
        }
        let chosen = healthy[rand::thread_rng().gen_range(0..healthy.len())];
        Ok((chosen.to_string(), partition.id.clone()))
    }

    pub async fn get(&self, key: &str) -> Result<KeyValueResponse> {
        let state = self.snapshot();
        let (address, partition_id) = Self::route_read(&state, key)?;
        let url = format!("http://{}/partitions/{}/keys/{}", address, partition_id, key);

        let resp = net::get_with_retry(&self.http, &url, FORWARD_RETRY)
            .await
            .map_err(KvError::Internal)?;
        let status = resp.status();
        if status.is_success() {
            resp.json()
                .await
                .map_err(|e| KvError::Internal(anyhow::anyhow!(e)))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(KvError::KeyNotFound(key.to_string()))
        } else {
            Err(KvError::Internal(anyhow::anyhow!(
                "replica answered {} for get {}",
                status,
                key
            )))
        }
    }

    pub async fn set(&self, key: &str, value: String) -> Result<KeyValueResponse> {
        let state = self.snapshot();
        let (address, partition_id) = Self::route_write(&state, key)?;
        let url = format!("http://{}/partitions/{}/keys/{}", address, partition_id, key);

        let body = SetValueRequest { value };
        let resp = self
            .http
            .put(&url)
            .json(&body)
            .timeout(FORWARD_TIMEOUT)
            .send()
            .await
            .map_err(|e| KvError::Internal(anyhow::anyhow!(e)))?;
        let status = resp.status();
        if status.is_success() {
            resp.json()
                .await
                .map_err(|e| KvError::Internal(anyhow::anyhow!(e)))
        } else if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            Err(KvError::PartitionUnavailable(partition_id))
        } else {
            Err(KvError::Internal(anyhow::anyhow!(
                "master answered {} for set {}",
                status,
                key
            )))
        }
    }

    pub async fn delete(&self, key: &str) -> Result<DeleteResponse> {
        let state = self.snapshot();
        let (address, partition_id) = Self::route_write(&state, key)?;
        let url = format!("http://{}/partitions/{}/keys/{}", address, partition_id, key);

        let resp = self
            .http
            .delete(&url)
            .timeout(FORWARD_TIMEOUT)
            .send()
            .await
            .map_err(|e| KvError::Internal(anyhow::anyhow!(e)))?;
        let status = resp.status();
        if status.is_success() {
            resp.json()
                .await
                .map_err(|e| KvError::Internal(anyhow::anyhow!(e)))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(KvError::KeyNotFound(key.to_string()))
        } else if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            Err(KvError::PartitionUnavailable(partition_id))
        } else {
            Err(KvError::Internal(anyhow::anyhow!(
                "master answered {} for delete {}",
                status,
                key
            )))
        }
    }

    /// Registration pass-through to the controller.
    pub async fn register_node(&self, req: RegisterNodeRequest) -> Result<RegisterNodeResponse> {
        let url = format!("{}/nodes/register", self.controller_url);
        let resp = net::post_json_with_retry(&self.http, &url, &req, FORWARD_RETRY)
            .await
            .map_err(KvError::Internal)?;
        let status = resp.status();
        if status.is_success() {
            resp.json()
                .await
                .map_err(|e| KvError::Internal(anyhow::anyhow!(e)))
        } else if status == reqwest::StatusCode::CONFLICT {
            Err(KvError::NodeExists(req.address))
        } else {
            Err(KvError::Internal(anyhow::anyhow!(
                "controller answered {} for registration",
                status
            )))
        }
    }
}
