use thiserror::Error;

use ohlcvq_warehouse::WarehouseError;

/// Validation and contract errors exposed by `ohlcvq-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instrument cannot be empty")]
    EmptyInstrument,
    #[error("unit cannot be empty")]
    EmptyUnit,
    #[error("api key for '{instrument}' cannot be empty")]
    EmptyApiKey { instrument: String },
    #[error("limit must be a positive integer, got {value}")]
    NonPositiveLimit { value: i64 },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("epoch seconds {value} are outside the supported range")]
    EpochOutOfRange { value: i64 },
    #[error("stored timestamp is not 'YYYY-MM-DD HH:MM:SS': '{value}'")]
    InvalidStoredTimestamp { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("schedule second must be within 0-59, got {value}")]
    ScheduleSecondOutOfRange { value: u8 },
}

/// A provider record that cannot be turned into a bar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record {index}: required field '{field}' is missing")]
    MissingField { index: usize, field: &'static str },
    #[error("record {index}: field '{field}' is not a number")]
    NotANumber { index: usize, field: &'static str },
    #[error("record {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task did not finish: {0}")]
    StorageTask(String),
}

/// Render an error and its `source()` chain, one cause per line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
