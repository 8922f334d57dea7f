//! Out-of-band management of the parameter store.

use ohlcvq_core::{FetchParameter, IngestConfig};
use serde_json::{json, Value};

use crate::cli::ParamsCommand;
use crate::error::CliError;

use super::open_warehouse;

pub fn run(command: &ParamsCommand, config: &IngestConfig) -> Result<Value, CliError> {
    let warehouse = open_warehouse(config)?;

    match command {
        ParamsCommand::Set(args) => {
            let parameter =
                FetchParameter::new(&args.instrument, &args.unit, &args.api_key, args.limit)?;
            let summary = masked(&parameter);
            warehouse.put_parameter(&parameter.into_record())?;
            tracing::info!(instrument = %args.instrument, unit = %args.unit, "fetch parameter saved");
            Ok(json!({ "status": "saved", "parameter": summary }))
        }
        ParamsCommand::List => {
            let parameters = warehouse
                .load_parameters()?
                .into_iter()
                .map(|record| FetchParameter::try_from(record).map(|parameter| masked(&parameter)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "parameters": parameters }))
        }
        ParamsCommand::Remove(args) => {
            let removed = warehouse.remove_parameter(args.instrument.trim(), args.unit.trim())?;
            Ok(json!({
                "instrument": args.instrument,
                "unit": args.unit,
                "removed": removed,
            }))
        }
    }
}

fn masked(parameter: &FetchParameter) -> Value {
    json!({
        "instrument": parameter.instrument,
        "unit": parameter.unit,
        "api_key": parameter.masked_api_key(),
        "limit": parameter.limit,
    })
}
