//! Per-role configuration.
//!
//! Values come from built-in defaults, overridden by `DKV_*` environment
//! variables, overridden again by command-line flags (parsed in `main`).
//! Durations are given in whole seconds.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_VIRTUAL_NODE_COUNT: usize = 64;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 2;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Peer listener: state reads, node registration, sync notifications.
    pub private_addr: SocketAddr,
    /// Operator listener: topology and registry commands.
    pub admin_addr: SocketAddr,
    pub balancer_url: String,
    pub virtual_node_count: usize,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self {
            private_addr: env_or("DKV_CONTROLLER_BIND", "127.0.0.1:9090".parse().unwrap()),
            admin_addr: env_or("DKV_CONTROLLER_ADMIN_BIND", "127.0.0.1:9091".parse().unwrap()),
            balancer_url: std::env::var("DKV_BALANCER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8001".to_string()),
            virtual_node_count: env_or("DKV_VIRTUAL_NODE_COUNT", DEFAULT_VIRTUAL_NODE_COUNT),
            health_check_interval: Duration::from_secs(env_or(
                "DKV_HEALTH_CHECK_INTERVAL_SECS",
                DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            )),
            health_check_timeout: Duration::from_secs(env_or(
                "DKV_HEALTH_CHECK_TIMEOUT_SECS",
                DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    /// Address peers should use to reach this node; defaults to `bind_addr`.
    pub advertise_addr: Option<String>,
    pub controller_url: String,
}

impl NodeConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("DKV_NODE_BIND", "127.0.0.1:8080".parse().unwrap()),
            advertise_addr: std::env::var("DKV_NODE_ADVERTISE").ok(),
            controller_url: std::env::var("DKV_CONTROLLER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9090".to_string()),
        }
    }

    pub fn advertise(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct BalancerConfig {
    /// Client listener: the `/kv/{key}` surface.
    pub public_addr: SocketAddr,
    /// Peer listener: snapshot intake from the controller.
    pub private_addr: SocketAddr,
    pub controller_url: String,
}

impl BalancerConfig {
    pub fn from_env() -> Self {
        Self {
            public_addr: env_or("DKV_BALANCER_BIND", "127.0.0.1:8000".parse().unwrap()),
            private_addr: env_or(
                "DKV_BALANCER_PRIVATE_BIND",
                "127.0.0.1:8001".parse().unwrap(),
            ),
            controller_url: std::env::var("DKV_CONTROLLER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9090".to_string()),
        }
    }
}
