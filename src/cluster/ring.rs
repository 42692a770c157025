//! Consistent-hash ring.
//!
//! Keys and virtual nodes hash with FNV-1a-64; the result is reinterpreted
//! as a signed 64-bit value because that is how hashes appear on the wire
//! and in stored state, and lookups must stay bit-for-bit compatible.

use uuid::Uuid;

use super::types::{ClusterState, Partition, VirtualNode};
use crate::error::{KvError, Result};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over `bytes`, reinterpreted as signed.
pub fn fnv1a_64(bytes: &[u8]) -> i64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

/// Creates `count` fresh virtual nodes for a partition. The caller inserts
/// them into the state and re-sorts the ring.
pub fn generate_virtual_nodes(partition_id: &str, count: usize) -> Vec<VirtualNode> {
    (0..count)
        .map(|_| {
            let id = Uuid::new_v4();
            VirtualNode {
                id,
                hash: fnv1a_64(id.to_string().as_bytes()),
                partition_id: partition_id.to_string(),
            }
        })
        .collect()
}

/// Sorts by hash ascending; ties break on the virtual node id, whose
/// canonical string form orders the same way as its bytes.
pub fn sort_virtual_nodes(virtual_nodes: &mut [VirtualNode]) {
    virtual_nodes.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.id.cmp(&b.id)));
}

/// Index of the first virtual node with `hash >= key_hash`, wrapping to 0
/// past the end. `None` on an empty ring.
pub(crate) fn lookup_index(virtual_nodes: &[VirtualNode], key_hash: i64) -> Option<usize> {
    if virtual_nodes.is_empty() {
        return None;
    }
    let idx = virtual_nodes.partition_point(|vn| vn.hash < key_hash);
    Some(if idx == virtual_nodes.len() { 0 } else { idx })
}

impl ClusterState {
    /// Maps a key to the partition owning it.
    pub fn partition_for_key(&self, key: &str) -> Result<&Partition> {
        let key_hash = fnv1a_64(key.as_bytes());
        let idx = lookup_index(&self.virtual_nodes, key_hash).ok_or(KvError::RingEmpty)?;
        let partition_id = &self.virtual_nodes[idx].partition_id;
        self.partitions
            .get(partition_id)
            .ok_or_else(|| KvError::PartitionNotFound(partition_id.clone()))
    }
}
