//! Kube Collector - Kubernetes cluster telemetry collector
//!
//! Scrapes metrics sources on a fixed interval, enriches every batch with
//! pod and workload metadata from the cluster, and hands it to the exporter.

use anyhow::{Context, Result};
use collector_lib::{
    config::{CollectorConfig, ConfigWatcher, FileListener},
    exporter::LogExporter,
    health::{components, HealthRegistry},
    k8s::{watch::spawn_watchers, PodStore, WorkloadCache},
    observability::StructuredLogger,
    processors::ProcessorChain,
    scheduler::CollectionLoopBuilder,
    sources::internal_stats_provider,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path of the optional configuration file
const CONFIG_PATH_ENV: &str = "KUBE_COLLECTOR_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kube-collector");

    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = CollectorConfig::load(config_path.as_deref())
        .context("Failed to load collector configuration")?;
    info!(
        node_name = %config.node_name,
        cluster = %config.cluster_name,
        config_file = ?config_path,
        "Collector configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCRAPER).await;
    health_registry.register(components::PROCESSORS).await;
    health_registry.register(components::EXPORTER).await;
    health_registry
        .set_degraded(components::KUBE_CACHE, "Waiting for initial pod and workload lists")
        .await;

    let logger = StructuredLogger::new(config.node_name.as_str());
    logger.log_startup(
        COLLECTOR_VERSION,
        &config.cluster_name,
        config.collection_interval_secs,
    );

    // Kubernetes caches
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let pods = Arc::new(PodStore::new());
    let workloads = Arc::new(WorkloadCache::new());
    let _watchers = spawn_watchers(client, pods.clone(), workloads.clone());
    tokio::spawn(wait_for_cache_sync(
        pods.clone(),
        workloads.clone(),
        health_registry.clone(),
    ));

    // Configuration reload
    let (config_tx, config_rx) = watch::channel(config.clone());
    let config_tx = Arc::new(config_tx);
    let _config_watch = match &config_path {
        Some(path) => {
            let listener = FileListener::new(config_tx.clone(), logger.clone());
            Some(
                ConfigWatcher::new(path.clone(), listener)
                    .start()
                    .context("Failed to watch configuration file")?,
            )
        }
        None => None,
    };

    let mut builder = CollectionLoopBuilder::new()
        .config(config.clone())
        .config_updates(config_rx)
        .exporter(Arc::new(LogExporter::new()))
        .health(health_registry.clone())
        .chain_factory(move |config| {
            ProcessorChain::standard(pods.clone(), workloads.clone(), config)
        });
    if config.internal_stats {
        builder = builder.provider(Arc::new(internal_stats_provider(config.node_name.as_str())));
    }
    let collection_loop = builder.build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(collection_loop.run(shutdown_rx));

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            warn!(error = %e, "API server stopped");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Collection loop did not shut down cleanly");
    }
    info!("Shutdown complete");

    Ok(())
}

/// Flip readiness once both caches have completed their initial list
async fn wait_for_cache_sync(
    pods: Arc<PodStore>,
    workloads: Arc<WorkloadCache>,
    health: HealthRegistry,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if pods.is_synced() && workloads.is_synced() {
            break;
        }
    }
    info!(pods = pods.len(), "Kubernetes caches synced");
    health.set_healthy(components::KUBE_CACHE).await;
    health.set_ready(true).await;
}
