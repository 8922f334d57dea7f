use ohlcvq_core::{Bar, IngestConfig};
use serde_json::{json, Value};

use crate::cli::BarsArgs;
use crate::error::CliError;

use super::open_warehouse;

pub fn run(args: &BarsArgs, config: &IngestConfig) -> Result<Value, CliError> {
    let warehouse = open_warehouse(config)?;
    let bars = warehouse
        .recent_bars(args.instrument.trim(), args.unit.trim(), args.limit)?
        .into_iter()
        .map(Bar::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "instrument": args.instrument,
        "unit": args.unit,
        "count": bars.len(),
        "bars": bars,
    }))
}
