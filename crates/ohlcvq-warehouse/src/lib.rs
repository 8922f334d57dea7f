//! # ohlcvq Warehouse
//!
//! DuckDB-backed storage for the ohlcvq ingestion pipeline.
//!
//! ## Overview
//!
//! The warehouse owns three concerns:
//!
//! - **Parameter store**: per-instrument fetch configuration, read once per tick
//! - **Upsert writer**: idempotent batch inserts of OHLCV bars, where rows that
//!   already exist are left untouched
//! - **Log table**: structured records accepted by the log collector
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ohlcvq_warehouse::{BarRecord, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!
//!     let session = warehouse.session()?;
//!     let parameters = session.load_parameters()?;
//!     println!("tracking {} instruments", parameters.len());
//!
//!     let report = session.upsert_bars(&[BarRecord {
//!         ts: "2023-11-14 22:13:20".to_string(),
//!         instrument: "BTC-USD".to_string(),
//!         unit: "MINUTE".to_string(),
//!         open: 1.0,
//!         high: 2.0,
//!         low: 0.5,
//!         close: 1.5,
//!         volume: 10.0,
//!         quote_volume: 15.0,
//!     }])?;
//!     println!("inserted {} of {}", report.inserted, report.attempted);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `sda_ohlcvq_params` | Fetch parameters keyed by (instrument, unit) |
//! | `sda_ohlcvq` | OHLCV bars keyed by (timestamp, instrument, unit) |
//! | `logs` | Collected diagnostic records |
//! | `schema_migrations` | Applied migration versions |
//!
//! Timestamps are stored as `TIMESTAMP` values in UTC and exchanged as
//! `YYYY-MM-DD HH:MM:SS` strings.

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection, IN_MEMORY};
pub use migrations::{BARS_TABLE, LOGS_TABLE, PARAMS_TABLE};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Rows handed to the warehouse violate a write contract.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Path to the `DuckDB` database file, or [`IN_MEMORY`].
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: resolve_ohlcvq_home().join("ohlcvq.duckdb"),
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::at(IN_MEMORY)
    }

    /// A database file named `file_name` under `$OHLCVQ_HOME`.
    pub fn in_home(file_name: &str) -> Self {
        Self::at(resolve_ohlcvq_home().join(file_name))
    }
}

/// A fetch parameter row as stored in `sda_ohlcvq_params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterRecord {
    pub instrument: String,
    pub unit: String,
    pub api_key: String,
    pub limit: i64,
}

/// A bar (OHLCV) row as stored in `sda_ohlcvq`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarRecord {
    /// Bar open time in UTC, formatted `YYYY-MM-DD HH:MM:SS`.
    pub ts: String,
    pub instrument: String,
    pub unit: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

/// Outcome of one upsert batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UpsertReport {
    /// Rows handed to the writer.
    pub attempted: usize,
    /// Rows that did not exist before and were written.
    pub inserted: usize,
}

impl UpsertReport {
    /// Rows skipped because their key was already stored.
    pub const fn skipped(&self) -> usize {
        self.attempted.saturating_sub(self.inserted)
    }
}

/// A structured log row for the `logs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Event time in UTC, formatted `YYYY-MM-DD HH:MM:SS`.
    pub occurred_at: String,
    pub service_name: String,
    pub log_level: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub request_id: String,
    /// JSON-encoded object.
    pub meta_info: String,
    /// JSON-encoded array of strings.
    pub tags: String,
}

/// A log row read back from the `logs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredLog {
    pub id: i64,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// The main warehouse handle. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse and apply pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if config.db_path.as_os_str() != IN_MEMORY {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Acquire a session that holds one connection until it is dropped.
    pub fn session(&self) -> Result<WarehouseSession, WarehouseError> {
        Ok(WarehouseSession {
            connection: self.manager.acquire()?,
        })
    }

    /// Load every fetch parameter row.
    pub fn load_parameters(&self) -> Result<Vec<ParameterRecord>, WarehouseError> {
        self.session()?.load_parameters()
    }

    /// Insert a batch of bars, skipping rows whose key already exists.
    pub fn upsert_bars(&self, rows: &[BarRecord]) -> Result<UpsertReport, WarehouseError> {
        self.session()?.upsert_bars(rows)
    }

    /// Create or replace a fetch parameter row.
    pub fn put_parameter(&self, row: &ParameterRecord) -> Result<(), WarehouseError> {
        if row.limit <= 0 {
            return Err(WarehouseError::InvalidData(format!(
                "limit for {}/{} must be positive, got {}",
                row.instrument, row.unit, row.limit
            )));
        }

        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 4] = [&row.instrument, &row.unit, &row.api_key, &row.limit];
        connection.execute(
            r#"INSERT OR REPLACE INTO sda_ohlcvq_params (instrument, unit, api_key, "limit") VALUES (?, ?, ?, ?)"#,
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Delete a fetch parameter row. Returns whether a row was removed.
    pub fn remove_parameter(&self, instrument: &str, unit: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute(
            "DELETE FROM sda_ohlcvq_params WHERE instrument = ? AND unit = ?",
            params![instrument, unit],
        )?;
        Ok(removed > 0)
    }

    /// Most recent bars for an (instrument, unit) pair, newest first.
    pub fn recent_bars(
        &self,
        instrument: &str,
        unit: &str,
        limit: usize,
    ) -> Result<Vec<BarRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        // `limit` is a plain integer, so formatting it into the statement is safe.
        let sql = format!(
            r#"SELECT CAST("timestamp" AS VARCHAR), instrument, unit, open, high, low, close, volume, quote_volume
               FROM sda_ohlcvq
               WHERE instrument = ? AND unit = ?
               ORDER BY "timestamp" DESC
               LIMIT {limit}"#
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map(params![instrument, unit], |row| {
            Ok(BarRecord {
                ts: row.get(0)?,
                instrument: row.get(1)?,
                unit: row.get(2)?,
                open: row.get(3)?,
                high: row.get(4)?,
                low: row.get(5)?,
                close: row.get(6)?,
                volume: row.get(7)?,
                quote_volume: row.get(8)?,
            })
        })?;
        let bars = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(bars)
    }

    /// Number of stored bars for an (instrument, unit) pair.
    pub fn count_bars(&self, instrument: &str, unit: &str) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        count_pair(&connection, instrument, unit)
    }

    /// Append a record to the `logs` table.
    pub fn insert_log(&self, record: &LogRecord) -> Result<i64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 8] = [
            &record.occurred_at,
            &record.service_name,
            &record.log_level,
            &record.message,
            &record.stack_trace,
            &record.request_id,
            &record.meta_info,
            &record.tags,
        ];
        let id = connection.query_row(
            "INSERT INTO logs \
             (occurred_at, service_name, log_level, message, stack_trace, request_id, meta_info, tags) \
             VALUES (CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Most recent log rows, newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<StoredLog>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let sql = format!(
            "SELECT id, CAST(occurred_at AS VARCHAR), service_name, log_level, message, stack_trace, \
             request_id, meta_info, tags FROM logs ORDER BY id DESC LIMIT {limit}"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map([], |row| {
            Ok(StoredLog {
                id: row.get(0)?,
                record: LogRecord {
                    occurred_at: row.get(1)?,
                    service_name: row.get(2)?,
                    log_level: row.get(3)?,
                    message: row.get(4)?,
                    stack_trace: row.get(5)?,
                    request_id: row.get(6)?,
                    meta_info: row.get(7)?,
                    tags: row.get(8)?,
                },
            })
        })?;
        let logs = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

/// One connection held for the lifetime of a unit of work, typically one tick.
///
/// The connection returns to the pool when the session is dropped, on every
/// exit path.
pub struct WarehouseSession {
    connection: PooledConnection,
}

impl WarehouseSession {
    /// Load every fetch parameter row, ordered by key.
    pub fn load_parameters(&self) -> Result<Vec<ParameterRecord>, WarehouseError> {
        let mut statement = self.connection.prepare(
            r#"SELECT instrument, unit, api_key, "limit" FROM sda_ohlcvq_params ORDER BY instrument, unit"#,
        )?;
        let rows = statement.query_map([], |row| {
            Ok(ParameterRecord {
                instrument: row.get(0)?,
                unit: row.get(1)?,
                api_key: row.get(2)?,
                limit: row.get(3)?,
            })
        })?;
        let parameters = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(parameters)
    }

    /// Insert a batch of bars for one (instrument, unit) pair in a single
    /// transaction. Rows whose `(timestamp, instrument, unit)` key already
    /// exists are skipped; any other failure rolls back the whole batch.
    pub fn upsert_bars(&self, rows: &[BarRecord]) -> Result<UpsertReport, WarehouseError> {
        let Some(first) = rows.first() else {
            return Ok(UpsertReport::default());
        };

        if let Some(stray) = rows
            .iter()
            .find(|row| row.instrument != first.instrument || row.unit != first.unit)
        {
            return Err(WarehouseError::InvalidData(format!(
                "batch for {}/{} contains a row for {}/{}",
                first.instrument, first.unit, stray.instrument, stray.unit
            )));
        }

        let connection = &*self.connection;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<UpsertReport, WarehouseError> {
            let before = count_pair(connection, &first.instrument, &first.unit)?;

            let mut statement = connection.prepare(
                r#"INSERT INTO sda_ohlcvq
                   ("timestamp", instrument, unit, open, high, low, close, volume, quote_volume)
                   VALUES (CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT ("timestamp", instrument, unit) DO NOTHING"#,
            )?;
            for row in rows {
                let params: [&dyn ToSql; 9] = [
                    &row.ts,
                    &row.instrument,
                    &row.unit,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &row.quote_volume,
                ];
                statement.execute(params.as_slice())?;
            }

            let after = count_pair(connection, &first.instrument, &first.unit)?;
            Ok(UpsertReport {
                attempted: rows.len(),
                inserted: after.saturating_sub(before),
            })
        })();

        finalize_transaction(connection, result)
    }
}

fn count_pair(connection: &Connection, instrument: &str, unit: &str) -> Result<usize, WarehouseError> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM sda_ohlcvq WHERE instrument = ? AND unit = ?",
        params![instrument, unit],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = connection.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback_error, "rollback after failed batch also failed");
            }
            Err(error)
        }
    }
}

/// Resolve the ohlcvq home directory from environment or default.
fn resolve_ohlcvq_home() -> PathBuf {
    if let Some(path) = env::var_os("OHLCVQ_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".ohlcvq");
    }

    PathBuf::from(".ohlcvq")
}
