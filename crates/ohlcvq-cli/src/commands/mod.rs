mod bars;
mod params;
mod run_once;
mod serve;

use std::sync::Arc;

use ohlcvq_core::{
    CoinDeskClient, HttpClient, IngestConfig, Ingester, LocalNotifier, Notifier,
    ReqwestHttpClient, RemoteLogNotifier, Storage,
};
use ohlcvq_warehouse::Warehouse;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Run the selected command. Returns JSON to print, if the command has any.
pub async fn run(cli: &Cli) -> Result<Option<Value>, CliError> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Serve(args) => {
            serve::run(args, config).await?;
            Ok(None)
        }
        Command::RunOnce(args) => run_once::run(args, config).await.map(Some),
        Command::Params(command) => params::run(command, &config).map(Some),
        Command::Bars(args) => bars::run(args, &config).map(Some),
    }
}

fn load_config(cli: &Cli) -> Result<IngestConfig, CliError> {
    let mut config = IngestConfig::from_env()?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    Ok(config)
}

fn open_warehouse(config: &IngestConfig) -> Result<Warehouse, CliError> {
    let warehouse = Warehouse::open(config.warehouse_config())?;
    tracing::debug!(db_path = %warehouse.db_path().display(), "warehouse opened");
    Ok(warehouse)
}

/// A wired-up ingester plus the remote sink, when one is configured, so the
/// caller can flush pending diagnostics before exiting.
struct Service {
    ingester: Ingester,
    remote_log: Option<Arc<RemoteLogNotifier>>,
}

impl Service {
    async fn flush_diagnostics(&self) {
        if let Some(remote_log) = &self.remote_log {
            remote_log.flush().await;
        }
    }
}

fn build_service(config: &IngestConfig, storage: impl Into<Storage>) -> Service {
    let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());

    let remote_log = config.logging_url.as_ref().map(|url| {
        Arc::new(RemoteLogNotifier::new(
            Arc::clone(&http_client),
            url.clone(),
            config.service_name.clone(),
            config.log_timeout_ms,
        ))
    });
    let notifier: Arc<dyn Notifier> = match &remote_log {
        Some(remote_log) => remote_log.clone(),
        None => {
            tracing::info!("LOGGING_URL not set; diagnostics go to the local log only");
            Arc::new(LocalNotifier::new(config.service_name.clone()))
        }
    };

    let source = CoinDeskClient::new(http_client, Arc::clone(&notifier))
        .with_base_url(config.provider_url.clone())
        .with_timeout_ms(config.request_timeout_ms);

    Service {
        ingester: Ingester::new(storage, Arc::new(source), notifier).with_pacing(config.pacing),
        remote_log,
    }
}
