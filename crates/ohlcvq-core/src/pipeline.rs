//! One ingestion tick: parameters in, bars stored.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use ohlcvq_warehouse::{BarRecord, Warehouse, WarehouseConfig, WarehouseError, WarehouseSession};

use crate::diagnostics::{DiagnosticEvent, Notifier};
use crate::error::CoreError;
use crate::market_data::{FetchRequest, MarketDataSource};
use crate::normalize::normalize_bars;
use crate::{Bar, FetchParameter, UtcDateTime};

const JOB_NAME: &str = "fetch_and_store";
const TAGS: [&str; 2] = ["scheduler", "ohlcv"];

/// Requested bar count widened by the minutes already elapsed in the hour.
pub fn actual_limit(limit: u32, minutes_passed: u8) -> u32 {
    limit.saturating_add(u32::from(minutes_passed))
}

/// Counters for one completed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub started_at: UtcDateTime,
    pub minutes_passed: u8,
    /// Parameter rows loaded from the store.
    pub parameters: usize,
    /// Instruments for which the provider was called.
    pub fetched: usize,
    /// Instruments whose batch was committed.
    pub stored: usize,
    /// Rows newly written across all instruments.
    pub inserted: usize,
    /// Rows skipped because they were already stored.
    pub skipped: usize,
    /// Instruments that produced no storable rows.
    pub empty: usize,
    /// Instruments that failed validation, normalization or writing.
    pub failed: usize,
}

impl TickReport {
    fn new(started_at: UtcDateTime, parameters: usize) -> Self {
        Self {
            started_at,
            minutes_passed: started_at.minutes_into_hour(),
            parameters,
            fetched: 0,
            stored: 0,
            inserted: 0,
            skipped: 0,
            empty: 0,
            failed: 0,
        }
    }
}

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed(TickReport),
    /// The parameter store was empty.
    NoParameters,
    /// The parameter store could not be read.
    ParametersUnavailable,
    /// Another tick was still running.
    AlreadyRunning,
}

/// Where a tick gets its database session from.
#[derive(Clone)]
pub enum Storage {
    /// A handle that stays open between ticks.
    Shared(Warehouse),
    /// Opened when a tick starts and closed when it ends, leaving the
    /// database file free for other processes between ticks.
    PerTick(WarehouseConfig),
}

impl Storage {
    fn open_session(&self) -> Result<WarehouseSession, WarehouseError> {
        match self {
            Self::Shared(warehouse) => warehouse.session(),
            Self::PerTick(config) => Warehouse::open(config.clone())?.session(),
        }
    }
}

impl From<Warehouse> for Storage {
    fn from(warehouse: Warehouse) -> Self {
        Self::Shared(warehouse)
    }
}

impl From<WarehouseConfig> for Storage {
    fn from(config: WarehouseConfig) -> Self {
        Self::PerTick(config)
    }
}

type SharedSession = Arc<std::sync::Mutex<WarehouseSession>>;

/// Run a warehouse call on the blocking pool.
async fn on_blocking_pool<T, F>(task: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, WarehouseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| CoreError::StorageTask(error.to_string()))?
        .map_err(CoreError::from)
}

async fn with_session<T, F>(session: &SharedSession, task: F) -> Result<T, CoreError>
where
    F: FnOnce(&WarehouseSession) -> Result<T, WarehouseError> + Send + 'static,
    T: Send + 'static,
{
    let session = Arc::clone(session);
    on_blocking_pool(move || {
        let session = session.lock().unwrap_or_else(PoisonError::into_inner);
        task(&*session)
    })
    .await
}

/// Drives fetch, normalize and upsert for every configured instrument.
pub struct Ingester {
    storage: Storage,
    source: Arc<dyn MarketDataSource>,
    notifier: Arc<dyn Notifier>,
    pacing: Duration,
    tick_lock: Mutex<()>,
}

impl Ingester {
    pub fn new(
        storage: impl Into<Storage>,
        source: Arc<dyn MarketDataSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage: storage.into(),
            source,
            notifier,
            pacing: Duration::from_secs(1),
            tick_lock: Mutex::new(()),
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub async fn run_tick(&self) -> TickOutcome {
        self.run_tick_at(UtcDateTime::now()).await
    }

    /// Run one tick as if it started at `now`.
    pub async fn run_tick_at(&self, now: UtcDateTime) -> TickOutcome {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            tracing::warn!("previous tick still running; skipping");
            return TickOutcome::AlreadyRunning;
        };

        let outcome = self.process(now).await;
        match &outcome {
            TickOutcome::Completed(report) => tracing::info!(
                parameters = report.parameters,
                fetched = report.fetched,
                stored = report.stored,
                inserted = report.inserted,
                skipped = report.skipped,
                empty = report.empty,
                failed = report.failed,
                "tick completed"
            ),
            other => tracing::info!(outcome = ?other, "tick ended early"),
        }
        outcome
    }

    async fn process(&self, now: UtcDateTime) -> TickOutcome {
        // Held for the whole tick and released on every return path.
        let storage = self.storage.clone();
        let session: SharedSession = match on_blocking_pool(move || storage.open_session()).await {
            Ok(session) => Arc::new(std::sync::Mutex::new(session)),
            Err(error) => {
                self.notifier.notify(
                    DiagnosticEvent::error(format!("failed to open warehouse session: {error}"))
                        .with_error_chain(&error)
                        .with_meta("job", JOB_NAME)
                        .with_tags(TAGS),
                );
                return TickOutcome::ParametersUnavailable;
            }
        };

        let rows = match with_session(&session, WarehouseSession::load_parameters).await {
            Ok(rows) => rows,
            Err(error) => {
                self.notifier.notify(
                    DiagnosticEvent::error(format!("failed to load fetch parameters: {error}"))
                        .with_error_chain(&error)
                        .with_meta("job", JOB_NAME)
                        .with_tags(TAGS),
                );
                return TickOutcome::ParametersUnavailable;
            }
        };

        if rows.is_empty() {
            self.notifier.notify(
                DiagnosticEvent::warning("no OHLCV fetch parameters found")
                    .with_meta("job", JOB_NAME)
                    .with_tags(TAGS),
            );
            return TickOutcome::NoParameters;
        }

        let mut report = TickReport::new(now, rows.len());

        for row in rows {
            let (instrument, unit) = (row.instrument.clone(), row.unit.clone());
            let parameter = match FetchParameter::try_from(row) {
                Ok(parameter) => parameter,
                Err(error) => {
                    report.failed += 1;
                    self.notifier.notify(
                        DiagnosticEvent::error(format!(
                            "invalid fetch parameter for {instrument}/{unit}: {error}"
                        ))
                        .with_meta("job", JOB_NAME)
                        .with_meta("instrument", instrument)
                        .with_meta("unit", unit)
                        .with_tags(TAGS),
                    );
                    continue;
                }
            };

            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let limit = actual_limit(parameter.limit, report.minutes_passed);
            let raw = self
                .source
                .fetch(FetchRequest {
                    instrument: parameter.instrument.clone(),
                    api_key: parameter.api_key.clone(),
                    limit,
                    unit: parameter.unit.clone(),
                })
                .await;
            report.fetched += 1;

            let bars = match normalize_bars(&parameter.instrument, &parameter.unit, &raw) {
                Ok(bars) => bars,
                Err(error) => {
                    report.failed += 1;
                    self.notify_failure(&parameter, "malformed provider record", &error);
                    continue;
                }
            };

            if bars.is_empty() {
                report.empty += 1;
                self.notifier.notify(
                    DiagnosticEvent::warning(format!(
                        "no rows to insert for instrument {} and unit {}",
                        parameter.instrument, parameter.unit
                    ))
                    .with_meta("job", JOB_NAME)
                    .with_meta("instrument", parameter.instrument.as_str())
                    .with_meta("unit", parameter.unit.as_str())
                    .with_tags(TAGS),
                );
                continue;
            }

            let records: Vec<BarRecord> = bars.iter().map(Bar::to_record).collect();
            match with_session(&session, move |session| session.upsert_bars(&records)).await {
                Ok(upsert) => {
                    report.stored += 1;
                    report.inserted += upsert.inserted;
                    report.skipped += upsert.skipped();
                    tracing::debug!(
                        instrument = %parameter.instrument,
                        unit = %parameter.unit,
                        attempted = upsert.attempted,
                        inserted = upsert.inserted,
                        "batch committed"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    self.notify_failure(&parameter, "failed to store bars", &error);
                }
            }
        }

        TickOutcome::Completed(report)
    }

    fn notify_failure(
        &self,
        parameter: &FetchParameter,
        context: &str,
        error: &(dyn std::error::Error + 'static),
    ) {
        self.notifier.notify(
            DiagnosticEvent::error(format!(
                "{context} for {}/{}: {error}",
                parameter.instrument, parameter.unit
            ))
            .with_error_chain(error)
            .with_meta("job", JOB_NAME)
            .with_meta("instrument", parameter.instrument.as_str())
            .with_meta("unit", parameter.unit.as_str())
            .with_tags(TAGS),
        );
    }
}
