//! Distributed Key-Value Store Library
//!
//! This library crate defines the core modules of the cluster. It serves
//! as the foundation for the binary executable (`main.rs`), which runs one
//! of three roles per process.
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`cluster`**: The shared coordination model. Cluster state snapshots,
//!   the consistent-hash ring with virtual nodes, and the replicated
//!   operation log entry types.
//! - **`controller`**: The topology authority. Owns the authoritative
//!   state, runs the node registry, assigns partitions and replica sets,
//!   probes node health and dispatches snapshots to every participant.
//! - **`store`**: The storage node. One partition store per hosted shard
//!   (keyed map plus operation log), replication to followers and resync
//!   from the master after a gap.
//! - **`balancer`**: The stateless router. Hashes client keys onto the
//!   ring and forwards writes to masters and reads to healthy replicas.
//! - **`config`**, **`error`**, **`net`**: ambient concerns shared by all
//!   roles (configuration loading, the error taxonomy, HTTP plumbing).

pub mod balancer;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod net;
pub mod store;
