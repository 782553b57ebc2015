use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_sync_service::config::SyncConfig;
use catalog_sync_service::db::{EntityStore, PgEntityStore};
use catalog_sync_service::services::sync::{ConsumerPool, MappingRegistry};
use catalog_sync_service::transport::{KafkaStreamTransport, StreamTransport};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,catalog_sync_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting catalog-sync-service");

    let config = SyncConfig::from_env().context("Failed to load configuration")?;
    config.log_config();

    let store = PgEntityStore::connect(&config.database)
        .await
        .context("Failed to create database pool")?;
    store
        .initialize()
        .await
        .context("Failed to initialize read-model tables")?;
    let store: Arc<dyn EntityStore> = Arc::new(store);

    let transport: Arc<dyn StreamTransport> =
        Arc::new(KafkaStreamTransport::new(&config.kafka));
    let registry = Arc::new(MappingRegistry::catalog());

    let streams = config.streams.clone();
    let pool = ConsumerPool::new(transport, store, registry, config);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let pool_shutdown = shutdown_tx.clone();
    let pool_task = tokio::spawn(async move { pool.start(streams, pool_shutdown).await });

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping stream runners");

    // Runners finish their in-flight message before exiting; nothing is
    // left applied-but-uncheckpointed beyond at-least-once semantics.
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, pool_task).await {
        Ok(Ok(())) => tracing::info!("Consumer pool shut down gracefully"),
        Ok(Err(e)) => tracing::error!("Consumer pool task panicked: {}", e),
        Err(_) => tracing::warn!("Consumer pool did not stop within timeout"),
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
