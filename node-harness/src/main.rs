use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use node_harness::rpc::HttpRpcConnector;
use node_harness::runtime::DockerRuntime;
use node_harness::volume::HostVolumeStore;
use node_harness::{HarnessConfig, HarnessContext, NodeSet};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "node_harness=info".into()),
        )
        .init();

    info!("node-harness starting...");

    // Load configuration
    let config = HarnessConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Chain ID: {}", config.chain.chain_id);
    info!("Image: {}", config.chain.image.reference());
    info!("Validators: {}, full nodes: {}", config.validators, config.full_nodes);
    info!("Docker network: {}", config.network);
    info!("Host mount: {}", config.host_mount_dir);

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    runtime
        .ensure_network(&config.network)
        .await
        .context("Failed to create docker network")?;

    tokio::fs::create_dir_all(&config.host_mount_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.host_mount_dir))?;

    let cancel = CancellationToken::new();
    let ctx = HarnessContext::new(
        Arc::new(runtime),
        Arc::new(HostVolumeStore::new(&config.host_mount_dir)),
        Arc::new(HttpRpcConnector::default()),
        config.network.clone(),
    )
    .with_host_mount_dir(config.host_mount_dir.clone())
    .with_readiness(config.readiness, config.readiness_grace)
    .with_cancellation(cancel.clone());

    let nodes = NodeSet::build(
        &ctx,
        Arc::new(config.chain.clone()),
        &config.test_name,
        config.validators,
        config.full_nodes,
    );

    let outcome = tokio::select! {
        r = run(&nodes) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            cancel.cancel();
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        error!("Network failed: {:#}", e);
    }

    info!("Tearing down containers...");
    if let Err(e) = nodes.teardown().await {
        warn!("Teardown incomplete: {}", e);
    }

    outcome
}

/// Bootstrap genesis, start every node and serve until interrupted
async fn run(nodes: &NodeSet) -> Result<()> {
    let bundle = nodes.bootstrap().await.context("Genesis bootstrap failed")?;
    for validator in &bundle.validators {
        info!("Validator {}: {} ({})", validator.node, validator.address, validator.node_id);
    }

    nodes.start_all().await.context("Failed to start nodes")?;

    for node in nodes.nodes() {
        if let Some(ports) = node.host_ports() {
            info!(
                "{} ready: rpc={} grpc={} api={}",
                node.name(),
                ports.rpc,
                ports.grpc,
                ports.api
            );
        }
    }

    info!("Network running, press Ctrl-C to stop");
    std::future::pending::<()>().await;
    Ok(())
}
