//! Jobscout - Entry Point
//!
//! Starts the proxy pool monitor and runs an ingestion sweep, with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod ingest;
mod models;
mod proxy;
mod store;

use config::{Config, LogConfig, StoreBackend};
use ingest::{CredentialQuotaManager, HttpSearchApi, IngestionEngine};
use proxy::{HttpProbe, MonitorHandle, ProxyMonitor, ProxyValidator, SourceAggregator};
use store::{CredentialStore, JobStore, MemoryStore, PgStore, ProxyStore};

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log);
    info!("Starting Jobscout");

    // Build the backing stores
    let (proxy_store, credential_store, job_store): (
        Arc<dyn ProxyStore>,
        Arc<dyn CredentialStore>,
        Arc<dyn JobStore>,
    ) = match config.store.backend {
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config).await?;
            store.run_migrations().await?;
            (
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(store),
            )
        }
        StoreBackend::Memory => {
            info!("Using in-memory store");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store.clone(), store)
        }
    };

    // Register configured API keys on first start
    let credentials = CredentialQuotaManager::new(
        credential_store.clone(),
        config.ingest.credential_reset_age_days,
    );
    if credential_store.count().await? == 0 {
        for key in &config.ingest.api_keys {
            credentials.register(key, config.ingest.token_limit).await?;
        }
        info!(
            registered = config.ingest.api_keys.len(),
            "API credentials registered"
        );
    }

    // Assemble the proxy pool pipeline
    let aggregator = SourceAggregator::new(config.sources.clone())?;
    let validator = ProxyValidator::new(
        proxy_store.clone(),
        Arc::new(HttpProbe),
        config.validator.clone(),
    );
    let monitor = Arc::new(ProxyMonitor::new(
        aggregator,
        validator,
        proxy_store.clone(),
        config.monitor.clone(),
    ));

    // Start the proxy monitor
    let (monitor_handle, monitor_shutdown) = MonitorHandle::new();
    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        })
    };

    // Run one ingestion sweep
    let api = Arc::new(HttpSearchApi::new(&config.ingest)?);
    let engine = IngestionEngine::new(api, credentials, job_store.clone(), config.ingest.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(async move {
        match engine.run(shutdown_rx).await {
            Ok(report) => info!(
                total = report.total_available,
                ingested = report.jobs_ingested,
                duplicate = report.jobs_duplicate,
                pages_ok = report.pages_ok,
                pages_failed = report.pages_failed,
                "Ingestion sweep finished"
            ),
            Err(e) => error!("Ingestion sweep failed: {}", e),
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Send shutdown signal to all services
    let _ = shutdown_tx.send(true);
    monitor_handle.shutdown();

    // Wait for all tasks to complete
    let _ = tokio::join!(monitor_task, engine_task);

    let pool = monitor.pool_stats().await?;
    info!(
        https_verified = pool.https_verified,
        target_verified = pool.target_verified,
        jobs = job_store.count().await?,
        "Jobscout stopped"
    );
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("jobscout={}", log.level).into());

    if log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
