use std::net::SocketAddr;
use std::process::ExitCode;

use ohlcvq_logger::{app, LoggerConfig};
use ohlcvq_warehouse::Warehouse;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LoggerConfig::from_env();

    let addr: SocketAddr = match format!("{}:{}", config.bind, config.port).parse() {
        Ok(addr) => addr,
        Err(error) => {
            tracing::error!(%error, bind = %config.bind, port = config.port, "invalid bind address");
            return ExitCode::from(2);
        }
    };

    let warehouse = match Warehouse::open(config.warehouse_config()) {
        Ok(warehouse) => warehouse,
        Err(error) => {
            tracing::error!(%error, db = %config.db_path.display(), "failed to open warehouse");
            return ExitCode::from(3);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, "failed to bind {addr}");
            return ExitCode::from(10);
        }
    };
    tracing::info!(db = %config.db_path.display(), "ohlcvq-logger listening on http://{addr}");

    if let Err(error) = axum::serve(listener, app(warehouse))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(%error, "server error");
        return ExitCode::from(10);
    }

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for Ctrl+C; shutting down");
        return;
    }
    tracing::info!("shutdown signal received");
}
