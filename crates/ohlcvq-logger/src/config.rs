use std::env;
use std::path::PathBuf;

use ohlcvq_warehouse::WarehouseConfig;

pub const DEFAULT_DB_FILE: &str = "logs.duckdb";

/// Log collector configuration derived from environment variables.
///
/// The collector keeps its own database file; DuckDB admits one writing
/// process per file and the ingestion service owns `ohlcvq.duckdb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub db_path: PathBuf,
    pub bind: String,
    pub port: u16,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            db_path: WarehouseConfig::in_home(DEFAULT_DB_FILE).db_path,
            bind: String::from("0.0.0.0"),
            port: 8001,
        }
    }
}

impl LoggerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Unparseable or blank values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            db_path: get("OHLCVQ_LOGGER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            bind: get("OHLCVQ_LOGGER_BIND").unwrap_or(defaults.bind),
            port: get("OHLCVQ_LOGGER_PORT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig {
            db_path: self.db_path.clone(),
            ..WarehouseConfig::default()
        }
    }
}
