use anyhow::{Context, Result};
use cat_service::api::{start_api_server, AppState};
use cat_service::{
    CatStore, ClassificationGate, Config, ImageCodec, LitterLoader, MemoryCatStore, PgCatStore,
    UploadPipeline,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Pet Battle cat service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = init_store(&config).await?;

    let gate = ClassificationGate::from_config(&config.nsfw)
        .context("Failed to initialize NSFW classifier")?;

    let pipeline = Arc::new(UploadPipeline::new(
        store.clone(),
        ImageCodec::new(&config.image),
        gate,
    ));

    let litter = Arc::new(LitterLoader::new(
        pipeline.clone(),
        config.seed.directory.clone(),
    ));

    if config.seed.enabled {
        match litter.seed_once().await {
            Ok(loaded) => info!(loaded, "Startup seeding finished"),
            Err(e) => warn!(error = %e, "Startup seeding failed"),
        }
    }

    let api_state = AppState {
        store,
        pipeline,
        litter,
    };

    info!("Cat service started successfully");

    if let Err(e) = start_api_server(api_state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Cat service stopped");

    Ok(())
}

/// Connect the configured store, running migrations when asked to
async fn init_store(config: &Config) -> Result<Arc<dyn CatStore>> {
    if config.uses_memory_store() {
        warn!("Using in-memory cat store; data is lost on restart");
        return Ok(Arc::new(MemoryCatStore::new()));
    }

    let store = PgCatStore::new(&config.database)
        .await
        .context("Failed to initialize cat store")?;

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    Ok(Arc::new(store))
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down cat service");
}
