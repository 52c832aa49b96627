use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ringback_core::config::{RingbackConfig, StoreBackend};
use ringback_scheduler::{
    store::{JobStore, MemoryJobStore, SqliteJobStore},
    CallDispatcher,
};
use tracing::info;

mod app;
mod dispatch;
mod http;

/// HTTP gateway and background workers for scheduled reminder calls.
#[derive(Debug, Parser)]
#[command(name = "ringback-gateway", version)]
struct Args {
    /// Path to ringback.toml (overrides RINGBACK_CONFIG).
    #[arg(long)]
    config: Option<String>,

    /// Bind address (overrides [gateway] bind).
    #[arg(long)]
    bind: Option<String>,

    /// Listen port (overrides [gateway] port).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ringback_gateway=info,ringback_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config > RINGBACK_CONFIG env > ~/.ringback/ringback.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("RINGBACK_CONFIG").ok());
    let mut config = RingbackConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        RingbackConfig::default()
    });
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let jobs = open_job_store(&config)?;
    let dispatcher: Arc<dyn CallDispatcher> =
        Arc::from(dispatch::build_dispatcher(&config.dispatcher)?);
    let service = app::build_service(&config, jobs, dispatcher);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // scheduler loop
    let scheduler = Arc::clone(service.scheduler());
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    // retention sweeper
    let retention_task = tokio::spawn(service.retention().clone().run(
        Arc::clone(service.jobs()),
        Arc::clone(service.calls()),
        Duration::from_secs(config.retention.interval_secs),
        shutdown_rx,
    ));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, service));
    let router = app::build_router(state);

    info!("Ringback gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop background loops; in-flight dispatches are not awaited
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(scheduler_task, retention_task);
    info!("Ringback gateway stopped");
    Ok(())
}

fn open_job_store(config: &RingbackConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("using in-memory job store");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = &config.store.path;
            ensure_parent_dir(path);
            info!(path = %path, "opening SQLite job store");
            Ok(Arc::new(SqliteJobStore::open(path)?))
        }
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
