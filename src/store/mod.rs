//! Node Storage Module
//!
//! Everything a storage node runs: one `PartitionStore` per hosted
//! partition (keyed map plus the replicated operation log) and the
//! `NodeStore` that reconciles them against controller snapshots, ships
//! operations to followers and re-syncs from the master after a gap.
//!
//! ## Core Concepts
//! - **Operation log**: every master write appends an entry with a dense,
//!   monotonically increasing id; the keyed map is always the result of
//!   replaying the log from empty.
//! - **Replication**: best-effort and asynchronous. A follower that sees a
//!   gap flips to syncing and pulls the missing tail from the master.
//! - **Reconcile**: on each snapshot the node creates, re-roles and drops
//!   partition stores so that it hosts exactly what the controller assigned.

pub mod handlers;
pub mod node;
pub mod partition;
pub mod protocol;
