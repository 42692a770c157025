//! Per-partition keyed map and operation log.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::cluster::types::{HealthStatus, Operation, OperationKind, PartitionRole, Role};
use crate::error::{KvError, Result};

/// Outcome of applying a replicated operation on a follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The operation id is below `next_op_id` and matches the logged entry.
    AlreadyApplied,
    /// The operation id is ahead of `next_op_id`. The store is now syncing;
    /// `started_sync` is true only for the call that flipped the flag.
    Gap { started_sync: bool },
}

struct Inner {
    map: HashMap<String, String>,
    op_log: Vec<Operation>,
    next_op_id: i64,
    role: Role,
    syncing: bool,
}

impl Inner {
    fn writable(&self, partition_id: &str) -> Result<()> {
        if self.role != Role::Master {
            return Err(KvError::NotMaster(partition_id.to_string()));
        }
        if self.syncing {
            return Err(KvError::Syncing(partition_id.to_string()));
        }
        Ok(())
    }
}

/// Storage for one partition on one node.
///
/// A single reader-writer lock guards the map, the log and the role flags;
/// it is never held across a network call. The log is append-only and
/// `next_op_id` increments strictly monotonically under the write lock.
pub struct PartitionStore {
    id: String,
    inner: RwLock<Inner>,
}

impl PartitionStore {
    pub fn new(id: String, role: Role, syncing: bool) -> Self {
        Self {
            id,
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                op_log: Vec::new(),
                next_op_id: 0,
                role,
                syncing,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Client read. Allowed on any role, rejected while syncing.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        if inner.syncing {
            return Err(KvError::Syncing(self.id.clone()));
        }
        Ok(inner.map.get(key).cloned())
    }

    /// Master write. Appends a `Set` entry and stores the value; the caller
    /// ships the returned operation to the followers.
    pub fn set(&self, key: String, value: String) -> Result<Operation> {
        let mut inner = self.inner.write().unwrap();
        inner.writable(&self.id)?;

        let op = Operation {
            id: inner.next_op_id,
            kind: OperationKind::Set,
            key: key.clone(),
            value: Some(value.clone()),
        };
        inner.next_op_id += 1;
        inner.op_log.push(op.clone());
        inner.map.insert(key, value);
        Ok(op)
    }

    /// Master delete. An absent key returns `Ok(None)` and appends nothing.
    pub fn delete(&self, key: &str) -> Result<Option<Operation>> {
        let mut inner = self.inner.write().unwrap();
        inner.writable(&self.id)?;

        if !inner.map.contains_key(key) {
            return Ok(None);
        }

        let op = Operation {
            id: inner.next_op_id,
            kind: OperationKind::Delete,
            key: key.to_string(),
            value: None,
        };
        inner.next_op_id += 1;
        inner.op_log.push(op.clone());
        inner.map.remove(key);
        Ok(Some(op))
    }

    /// Follower apply. Legal while syncing so that a resync can drain.
    pub fn apply(&self, op: &Operation) -> Result<Applied> {
        match op.kind {
            OperationKind::Set if op.value.is_none() => {
                return Err(KvError::MalformedOperation(format!(
                    "set operation {} carries no value",
                    op.id
                )));
            }
            OperationKind::Delete if op.value.is_some() => {
                return Err(KvError::MalformedOperation(format!(
                    "delete operation {} carries a value",
                    op.id
                )));
            }
            _ => {}
        }

        let mut inner = self.inner.write().unwrap();
        if inner.role == Role::Master {
            return Err(KvError::NotFollower(self.id.clone()));
        }

        let expected = inner.next_op_id;
        if op.id == expected {
            match op.kind {
                OperationKind::Set => {
                    inner
                        .map
                        .insert(op.key.clone(), op.value.clone().unwrap_or_default());
                }
                OperationKind::Delete => {
                    inner.map.remove(&op.key);
                }
            }
            inner.op_log.push(op.clone());
            inner.next_op_id = op.id + 1;
            return Ok(Applied::Applied);
        }

        if op.id < expected {
            // The log is dense from 0, so the entry with this id is at the
            // same index. A differing entry means two masters handed out the
            // same id, which we refuse.
            return match inner.op_log.get(op.id as usize) {
                Some(existing) if existing == op => Ok(Applied::AlreadyApplied),
                Some(_) => Err(KvError::OperationConflict(op.id)),
                None => Ok(Applied::AlreadyApplied),
            };
        }

        let started_sync = !inner.syncing;
        inner.syncing = true;
        Ok(Applied::Gap { started_sync })
    }

    /// Serves a single log entry to a follower. Master-only.
    pub fn operation(&self, op_id: i64) -> Result<Operation> {
        let inner = self.inner.read().unwrap();
        inner.writable(&self.id)?;

        if op_id >= inner.next_op_id {
            return Err(KvError::OperationOutOfBound(op_id));
        }
        inner
            .op_log
            .iter()
            .find(|op| op.id == op_id)
            .cloned()
            .ok_or(KvError::OperationNotFound(op_id))
    }

    /// Serves every log entry with `id > after`, in order. Master-only.
    pub fn operations_after(&self, after: i64) -> Result<Vec<Operation>> {
        let inner = self.inner.read().unwrap();
        inner.writable(&self.id)?;

        Ok(inner
            .op_log
            .iter()
            .filter(|op| op.id > after)
            .cloned()
            .collect())
    }

    /// Reconcile hook used when a new cluster snapshot arrives.
    pub fn set_role(&self, role: Role, syncing: bool) {
        let mut inner = self.inner.write().unwrap();
        inner.role = role;
        inner.syncing = syncing;
    }

    pub fn finish_sync(&self) {
        self.inner.write().unwrap().syncing = false;
    }

    pub fn next_op_id(&self) -> i64 {
        self.inner.read().unwrap().next_op_id
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.read().unwrap().syncing
    }

    /// Role as reported back to the controller.
    pub fn partition_role(&self) -> PartitionRole {
        let inner = self.inner.read().unwrap();
        PartitionRole {
            role: inner.role,
            syncing: inner.syncing,
            status: HealthStatus::Healthy,
        }
    }

    #[cfg(test)]
    pub(crate) fn log(&self) -> Vec<Operation> {
        self.inner.read().unwrap().op_log.clone()
    }

    #[cfg(test)]
    pub(crate) fn map_snapshot(&self) -> HashMap<String, String> {
        self.inner.read().unwrap().map.clone()
    }
}
