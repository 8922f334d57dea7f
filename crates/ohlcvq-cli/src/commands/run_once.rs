use std::time::Duration;

use ohlcvq_core::{IngestConfig, UtcDateTime};
use serde_json::Value;

use crate::cli::RunOnceArgs;
use crate::error::CliError;

use super::{build_service, open_warehouse};

pub async fn run(args: &RunOnceArgs, mut config: IngestConfig) -> Result<Value, CliError> {
    let started_at = match &args.at {
        Some(value) => UtcDateTime::parse(value)?,
        None => UtcDateTime::now(),
    };
    if args.no_pacing {
        config.pacing = Duration::ZERO;
    }

    let warehouse = open_warehouse(&config)?;
    let service = build_service(&config, warehouse);

    let outcome = service.ingester.run_tick_at(started_at).await;
    service.flush_diagnostics().await;

    Ok(serde_json::to_value(outcome)?)
}
