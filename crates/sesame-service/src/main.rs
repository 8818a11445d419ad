//! Sesame Service - webhook receiver and HTTP accessory API.
//!
//! Run with: `cargo run -p sesame-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sesame_core::{LockApi, SesameClient};
use sesame_service::{AppState, Config, platform};
use sesame_store::Store;

/// Sesame Service - webhook receiver and HTTP accessory API.
#[derive(Parser, Debug)]
#[command(name = "sesame-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Log reconciliation details.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.debug |= args.debug;

    let level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("sesame_service={}", level).parse()?)
                .add_directive(format!("sesame_core={}", level).parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let client = SesameClient::new(config.api.client_config())
        .context("failed to create the Sesame API client")?;
    let api: Arc<dyn LockApi> = Arc::new(client);

    let bind = config.server.bind.clone();
    let state = AppState::new(store, config, api);

    let discovery = Arc::clone(&state);
    tokio::spawn(async move {
        let count = platform::discover(&discovery).await;
        info!("Discovered {} lock(s)", count);
    });

    let app = sesame_service::app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    let addr: SocketAddr = listener.local_addr()?;
    info!("Listening for webhooks on port {}", addr.port());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.executor.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
