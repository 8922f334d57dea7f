use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ohlcvq_warehouse::{BarRecord, ParameterRecord};

use crate::{UtcDateTime, ValidationError};

/// Bar granularity used when a parameter row does not name one.
pub const DEFAULT_UNIT: &str = "MINUTE";
/// Bar count requested when a parameter row does not name one.
pub const DEFAULT_LIMIT: u32 = 1000;

/// Per-instrument fetch configuration, keyed by (instrument, unit).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParameter {
    pub instrument: String,
    pub unit: String,
    pub api_key: String,
    pub limit: u32,
}

impl FetchParameter {
    pub fn new(
        instrument: impl Into<String>,
        unit: impl Into<String>,
        api_key: impl Into<String>,
        limit: i64,
    ) -> Result<Self, ValidationError> {
        let instrument = instrument.into().trim().to_owned();
        let unit = unit.into().trim().to_owned();
        let api_key = api_key.into();

        if instrument.is_empty() {
            return Err(ValidationError::EmptyInstrument);
        }
        if unit.is_empty() {
            return Err(ValidationError::EmptyUnit);
        }
        if api_key.trim().is_empty() {
            return Err(ValidationError::EmptyApiKey { instrument });
        }
        let limit = u32::try_from(limit)
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or(ValidationError::NonPositiveLimit { value: limit })?;

        Ok(Self {
            instrument,
            unit,
            api_key,
            limit,
        })
    }

    /// API key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let visible: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let hidden = self.api_key.chars().count().saturating_sub(visible.chars().count());
        format!("{}{visible}", "*".repeat(hidden.max(4)))
    }

    pub fn into_record(self) -> ParameterRecord {
        ParameterRecord {
            instrument: self.instrument,
            unit: self.unit,
            api_key: self.api_key,
            limit: i64::from(self.limit),
        }
    }
}

impl TryFrom<ParameterRecord> for FetchParameter {
    type Error = ValidationError;

    fn try_from(record: ParameterRecord) -> Result<Self, Self::Error> {
        Self::new(record.instrument, record.unit, record.api_key, record.limit)
    }
}

// Credentials stay out of `{:?}` output, which ends up in logs.
impl std::fmt::Debug for FetchParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchParameter")
            .field("instrument", &self.instrument)
            .field("unit", &self.unit)
            .field("api_key", &self.masked_api_key())
            .field("limit", &self.limit)
            .finish()
    }
}

/// One OHLCV observation ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: UtcDateTime,
    pub instrument: String,
    pub unit: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

impl Bar {
    pub fn to_record(&self) -> BarRecord {
        BarRecord {
            ts: self.ts.format_sql(),
            instrument: self.instrument.clone(),
            unit: self.unit.clone(),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            quote_volume: self.quote_volume,
        }
    }
}

impl TryFrom<BarRecord> for Bar {
    type Error = ValidationError;

    fn try_from(record: BarRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            ts: UtcDateTime::parse_sql(&record.ts)?,
            instrument: record.instrument,
            unit: record.unit,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            quote_volume: record.quote_volume,
        })
    }
}

/// One element of the provider's `Data` array, kept as decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawBar(Map<String, Value>);

impl RawBar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for RawBar {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}
