use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use ohlcvq_warehouse::WarehouseConfig;

use crate::error::ValidationError;
use crate::market_data::{DEFAULT_PROVIDER_URL, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::scheduler::HourlySchedule;

pub const DEFAULT_SERVICE_NAME: &str = "coindesk_2019-sda-ohlcv";
pub const DEFAULT_LOG_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_PACING_MS: u64 = 1_000;
pub const DEFAULT_SCHEDULE_SECOND: u8 = 1;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 600;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}='{value}' is not a valid {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Ingestion service configuration derived from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub db_path: PathBuf,
    pub service_name: String,
    /// Log collector endpoint. `None` keeps diagnostics in the local log.
    pub logging_url: Option<String>,
    pub provider_url: String,
    pub request_timeout_ms: u64,
    pub log_timeout_ms: u64,
    /// Delay before each provider request within a tick.
    pub pacing: Duration,
    /// Second past the top of the hour at which a tick fires.
    pub schedule_second: u8,
    /// How late a trigger may start and still run.
    pub misfire_grace: Duration,
    pub bind: String,
    pub port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: WarehouseConfig::default().db_path,
            service_name: String::from(DEFAULT_SERVICE_NAME),
            logging_url: None,
            provider_url: String::from(DEFAULT_PROVIDER_URL),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_timeout_ms: DEFAULT_LOG_TIMEOUT_MS,
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            schedule_second: DEFAULT_SCHEDULE_SECOND,
            misfire_grace: Duration::from_secs(DEFAULT_MISFIRE_GRACE_SECS),
            bind: String::from("0.0.0.0"),
            port: 8000,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Lookup(lookup);
        let defaults = Self::default();

        let schedule_second = vars.parse("OHLCVQ_SCHEDULE_SECOND", defaults.schedule_second, "u8")?;
        let misfire_grace = Duration::from_secs(vars.parse(
            "OHLCVQ_MISFIRE_GRACE_SECS",
            DEFAULT_MISFIRE_GRACE_SECS,
            "second count",
        )?);
        HourlySchedule::new(schedule_second, misfire_grace).map_err(|_| ConfigError::Invalid {
            name: "OHLCVQ_SCHEDULE_SECOND",
            value: schedule_second.to_string(),
            expected: "second of minute (0-59)",
        })?;

        Ok(Self {
            db_path: vars
                .get("OHLCVQ_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            service_name: vars.get("SERVICE_NAME").unwrap_or(defaults.service_name),
            logging_url: vars.get("LOGGING_URL"),
            provider_url: vars
                .get("OHLCVQ_PROVIDER_URL")
                .unwrap_or(defaults.provider_url),
            request_timeout_ms: vars.parse(
                "OHLCVQ_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
                "millisecond count",
            )?,
            log_timeout_ms: vars.parse(
                "OHLCVQ_LOG_TIMEOUT_MS",
                defaults.log_timeout_ms,
                "millisecond count",
            )?,
            pacing: Duration::from_millis(vars.parse(
                "OHLCVQ_PACING_MS",
                DEFAULT_PACING_MS,
                "millisecond count",
            )?),
            schedule_second,
            misfire_grace,
            bind: vars.get("OHLCVQ_BIND").unwrap_or(defaults.bind),
            port: vars.parse("OHLCVQ_PORT", defaults.port, "port")?,
        })
    }

    /// Trigger schedule for `serve`.
    pub fn schedule(&self) -> Result<HourlySchedule, ValidationError> {
        HourlySchedule::new(self.schedule_second, self.misfire_grace)
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::at(&self.db_path)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: std::str::FromStr>(
        &self,
        name: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name,
                value,
                expected,
            }),
        }
    }
}
