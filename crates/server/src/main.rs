//! chunklog server binary.

use anyhow::{Context, Result};
use chunklog_core::config::AppConfig;
use chunklog_server::{AppState, create_router};
use chunklog_storage::{KeyValueStore, PointerPublisher};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// chunklog - chunked log upload, retrieval and watch service
#[derive(Parser, Debug)]
#[command(name = "chunklogd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CHUNKLOG_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Periodically reclaim expired entries from the store adapter.
fn spawn_purge_task(store: Arc<dyn KeyValueStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => tracing::debug!("expired entry sweep found nothing"),
                Ok(purged) => tracing::info!(purged, "expired entries purged"),
                Err(e) => tracing::error!(error = %e, "expired entry sweep failed"),
            }
        }
    })
}

fn load_config(args: &Args) -> Result<AppConfig> {
    // The file is optional; env vars can provide or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("CHUNKLOG_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("chunklog v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    chunklog_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = chunklog_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = store.backend_name(), "Storage backend initialized");

    // Fail startup rather than report healthy against an unreachable store.
    store
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    // Exactly one publisher per process owns the latest-upload pointer.
    let publisher = PointerPublisher::new(Arc::clone(&store), config.logs.pointer_ttl());
    let pointer = publisher.handle();
    let _publisher_handle = publisher.spawn();

    let purge_interval = config.logs.purge_interval();
    let _purge_handle = spawn_purge_task(Arc::clone(&store), purge_interval);
    tracing::info!(
        interval_secs = purge_interval.as_secs(),
        "Expired entry sweep spawned"
    );

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config, store, pointer);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
