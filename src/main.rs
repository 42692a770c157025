use std::time::Duration;

use axum::extract::Extension;
use axum::routing::{delete, get, post, put};
use axum::Router;

use distkv::balancer::core::LoadBalancer;
use distkv::balancer::handlers as balancer_handlers;
use distkv::cluster::types::NodeId;
use distkv::config::{BalancerConfig, ControllerConfig, NodeConfig};
use distkv::controller::core::Controller;
use distkv::controller::handlers as controller_handlers;
use distkv::controller::protocol::{self as controller_protocol, RegisterNodeRequest, RegisterNodeResponse};
use distkv::net::{self, handle_health, RetryPolicy};
use distkv::store::handlers as store_handlers;
use distkv::store::node::NodeStore;
use distkv::store::protocol as store_protocol;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "controller" => run_controller(&args[2..]).await,
        "node" => run_node(&args[2..]).await,
        "balancer" => run_balancer(&args[2..]).await,
        other => {
            eprintln!("Unknown role: {}", other);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(binary: &str) {
    eprintln!("Usage: {} <controller|node|balancer> [flags]", binary);
    eprintln!();
    eprintln!("  controller --bind <addr:port> --admin-bind <addr:port> --balancer-url <url>");
    eprintln!("  node       --bind <addr:port> [--advertise <addr:port>] --controller-url <url>");
    eprintln!("  balancer   --bind <addr:port> --private-bind <addr:port> --controller-url <url>");
    eprintln!();
    eprintln!("Every flag falls back to its DKV_* environment variable, then to a default.");
}

async fn run_controller(args: &[String]) -> anyhow::Result<()> {
    let mut cfg = ControllerConfig::from_env();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                cfg.private_addr = args[i + 1].parse()?;
                i += 2;
            }
            "--admin-bind" => {
                cfg.admin_addr = args[i + 1].parse()?;
                i += 2;
            }
            "--balancer-url" => {
                cfg.balancer_url = args[i + 1].clone();
                i += 2;
            }
            "--virtual-nodes" => {
                cfg.virtual_node_count = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    tracing::info!(
        "Starting controller on {} (admin on {})",
        cfg.private_addr,
        cfg.admin_addr
    );

    let controller = Controller::new(
        cfg.virtual_node_count,
        cfg.health_check_interval,
        cfg.health_check_timeout,
        cfg.balancer_url.clone(),
    );
    controller.clone().start();

    let private_app = Router::new()
        .route(
            controller_protocol::ENDPOINT_STATE,
            get(controller_handlers::handle_get_state),
        )
        .route(
            controller_protocol::ENDPOINT_REGISTER,
            post(controller_handlers::handle_register_node),
        )
        .route(
            controller_protocol::ENDPOINT_SYNC_COMPLETE,
            post(controller_handlers::handle_sync_complete),
        )
        .route("/health", get(handle_health))
        .layer(Extension(controller.clone()));

    let admin_app = Router::new()
        .route(
            controller_protocol::ENDPOINT_STATE,
            get(controller_handlers::handle_get_state),
        )
        .route(
            controller_protocol::ENDPOINT_ACCEPT_NODE,
            post(controller_handlers::handle_accept_node),
        )
        .route(
            controller_protocol::ENDPOINT_NODE,
            delete(controller_handlers::handle_remove_node),
        )
        .route(
            controller_protocol::ENDPOINT_PARTITION_COUNT,
            put(controller_handlers::handle_set_partition_count),
        )
        .route(
            controller_protocol::ENDPOINT_REPLICA_COUNT,
            put(controller_handlers::handle_set_replica_count),
        )
        .route(
            controller_protocol::ENDPOINT_MIGRATION_STATUS,
            put(controller_handlers::handle_set_migration_status),
        )
        .route("/health", get(handle_health))
        .layer(Extension(controller.clone()));

    let admin_listener = tokio::net::TcpListener::bind(cfg.admin_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin_app).await {
            tracing::error!(error = %e, "admin server stopped");
        }
    });

    tracing::info!("Controller ready");
    let listener = tokio::net::TcpListener::bind(cfg.private_addr).await?;
    axum::serve(listener, private_app).await?;
    Ok(())
}

async fn run_node(args: &[String]) -> anyhow::Result<()> {
    let mut cfg = NodeConfig::from_env();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                cfg.bind_addr = args[i + 1].parse()?;
                i += 2;
            }
            "--advertise" => {
                cfg.advertise_addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--controller-url" => {
                cfg.controller_url = args[i + 1].clone();
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let advertise = cfg.advertise();
    tracing::info!(
        "Starting storage node on {} (advertised as {})",
        cfg.bind_addr,
        advertise
    );

    let node_id = register_with_controller(&cfg.controller_url, &advertise).await?;
    tracing::info!(node_id = %node_id, "registered with controller, awaiting acceptance");

    let node = NodeStore::new(node_id, cfg.controller_url.clone());
    node.clone().start();

    let app = Router::new()
        .route(
            store_protocol::ENDPOINT_STATE,
            get(store_handlers::handle_get_state).post(store_handlers::handle_set_state),
        )
        .route(
            store_protocol::ENDPOINT_PARTITION_KEY,
            get(store_handlers::handle_get_value)
                .put(store_handlers::handle_set_value)
                .delete(store_handlers::handle_delete_key),
        )
        .route(
            store_protocol::ENDPOINT_PARTITION_OPERATIONS,
            get(store_handlers::handle_get_operations).post(store_handlers::handle_apply_operation),
        )
        .route(
            store_protocol::ENDPOINT_PARTITION_OPERATION,
            get(store_handlers::handle_get_operation),
        )
        .route("/health", get(handle_health))
        .layer(Extension(node.clone()));

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Announces this node to the controller, retrying until it is reachable.
/// The id the controller hands out identifies this node for its lifetime.
async fn register_with_controller(controller_url: &str, advertise: &str) -> anyhow::Result<NodeId> {
    let client = reqwest::Client::new();
    let url = format!("{}/nodes/register", controller_url);
    let req = RegisterNodeRequest {
        address: advertise.to_string(),
    };

    let retry = RetryPolicy::new(Duration::from_secs(5), 3);
    let mut delay = Duration::from_secs(1);
    loop {
        match net::post_json_with_retry(&client, &url, &req, retry).await {
            Ok(resp) if resp.status().is_success() => {
                let body: RegisterNodeResponse = resp.json().await?;
                return Ok(body.id);
            }
            Ok(resp) if resp.status() == reqwest::StatusCode::CONFLICT => {
                anyhow::bail!(
                    "address {} is already registered with the controller",
                    advertise
                );
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "controller refused registration, retrying");
            }
            Err(e) => {
                tracing::warn!(error = %e, "controller unreachable, retrying registration");
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(30));
    }
}

async fn run_balancer(args: &[String]) -> anyhow::Result<()> {
    let mut cfg = BalancerConfig::from_env();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                cfg.public_addr = args[i + 1].parse()?;
                i += 2;
            }
            "--private-bind" => {
                cfg.private_addr = args[i + 1].parse()?;
                i += 2;
            }
            "--controller-url" => {
                cfg.controller_url = args[i + 1].clone();
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    tracing::info!(
        "Starting load balancer on {} (private on {})",
        cfg.public_addr,
        cfg.private_addr
    );

    let balancer = LoadBalancer::new(cfg.controller_url.clone());

    let public_app = Router::new()
        .route(
            "/kv/:key",
            get(balancer_handlers::handle_get_key)
                .put(balancer_handlers::handle_put_key)
                .delete(balancer_handlers::handle_delete_key),
        )
        .route("/nodes/register", post(balancer_handlers::handle_register_node))
        .route("/health", get(handle_health))
        .layer(Extension(balancer.clone()));

    let private_app = Router::new()
        .route("/state", post(balancer_handlers::handle_set_state))
        .route("/health", get(handle_health))
        .layer(Extension(balancer.clone()));

    let private_listener = tokio::net::TcpListener::bind(cfg.private_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(private_listener, private_app).await {
            tracing::error!(error = %e, "private server stopped");
        }
    });

    tracing::info!("Load balancer ready");
    let listener = tokio::net::TcpListener::bind(cfg.public_addr).await?;
    axum::serve(listener, public_app).await?;
    Ok(())
}
