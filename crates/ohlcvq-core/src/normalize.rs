//! Raw provider records to storage-ready bars.

use serde_json::Value;

use crate::{Bar, NormalizeError, RawBar, UtcDateTime};

pub const TIMESTAMP: &str = "TIMESTAMP";
pub const OPEN: &str = "OPEN";
pub const HIGH: &str = "HIGH";
pub const LOW: &str = "LOW";
pub const CLOSE: &str = "CLOSE";
pub const VOLUME: &str = "VOLUME";
pub const QUOTE_VOLUME: &str = "QUOTE_VOLUME";

/// Drop bars without traded volume and convert the rest.
///
/// A bar is kept only when both `VOLUME` and `QUOTE_VOLUME` are non-zero; an
/// absent volume field counts as zero. Kept bars preserve input order.
pub fn normalize_bars(
    instrument: &str,
    unit: &str,
    raw: &[RawBar],
) -> Result<Vec<Bar>, NormalizeError> {
    let mut bars = Vec::with_capacity(raw.len());

    for (index, record) in raw.iter().enumerate() {
        let volume = optional_number(record, index, VOLUME)?.unwrap_or(0.0);
        let quote_volume = optional_number(record, index, QUOTE_VOLUME)?.unwrap_or(0.0);
        if volume == 0.0 || quote_volume == 0.0 {
            continue;
        }

        let seconds = epoch_seconds(record, index)?;
        let ts = UtcDateTime::from_unix_timestamp(seconds)
            .map_err(|source| NormalizeError::Invalid { index, source })?;

        bars.push(Bar {
            ts,
            instrument: instrument.to_owned(),
            unit: unit.to_owned(),
            open: required_number(record, index, OPEN)?,
            high: required_number(record, index, HIGH)?,
            low: required_number(record, index, LOW)?,
            close: required_number(record, index, CLOSE)?,
            volume,
            quote_volume,
        });
    }

    Ok(bars)
}

fn optional_number(
    record: &RawBar,
    index: usize,
    field: &'static str,
) -> Result<Option<f64>, NormalizeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or(NormalizeError::NotANumber { index, field }),
    }
}

fn required_number(record: &RawBar, index: usize, field: &'static str) -> Result<f64, NormalizeError> {
    optional_number(record, index, field)?.ok_or(NormalizeError::MissingField { index, field })
}

fn epoch_seconds(record: &RawBar, index: usize) -> Result<i64, NormalizeError> {
    let value = record.get(TIMESTAMP).ok_or(NormalizeError::MissingField {
        index,
        field: TIMESTAMP,
    })?;

    if let Some(seconds) = value.as_i64() {
        return Ok(seconds);
    }

    // Some payloads carry whole seconds as floats.
    value
        .as_f64()
        .filter(|seconds| seconds.fract() == 0.0 && seconds.is_finite())
        .map(|seconds| seconds as i64)
        .ok_or(NormalizeError::NotANumber {
            index,
            field: TIMESTAMP,
        })
}
