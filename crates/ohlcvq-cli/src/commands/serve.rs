//! Long-running service: hourly scheduler plus `/health`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use ohlcvq_core::{IngestConfig, Scheduler};
use serde_json::{json, Value};

use crate::cli::ServeArgs;
use crate::error::CliError;

use super::{build_service, open_warehouse};

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn run(args: &ServeArgs, mut config: IngestConfig) -> Result<(), CliError> {
    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = &args.logging_url {
        config.logging_url = Some(url.clone());
    }

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|error| CliError::Runtime(format!("invalid bind address: {error}")))?;

    // Migrate once; ticks reopen the file so it is unlocked between them.
    drop(open_warehouse(&config)?);
    let schedule = config.schedule()?;
    let service = build_service(&config, config.warehouse_config());
    let remote_log = service.remote_log.clone();
    let ingester = Arc::new(service.ingester);

    let scheduler = Scheduler::start(ingester, schedule);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(service = %config.service_name, "ohlcvq listening on http://{addr}");

    let served = axum::serve(listener, router())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    if let Some(remote_log) = remote_log {
        remote_log.flush().await;
    }
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for Ctrl+C; shutting down");
        return;
    }
    tracing::info!("shutdown signal received, stopping scheduler");
}
