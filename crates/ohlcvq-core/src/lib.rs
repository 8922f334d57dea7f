//! # ohlcvq Core
//!
//! Scheduled OHLCV ingestion: fetch bars from the market data provider,
//! normalize them, and upsert them into the warehouse once per hour.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Environment-driven service configuration |
//! | [`diagnostics`] | Best-effort diagnostic events and notifiers |
//! | [`domain`] | Fetch parameters, bars, raw provider records, UTC timestamps |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`market_data`] | Market data source trait and the CoinDesk client |
//! | [`normalize`] | Raw record filtering and conversion |
//! | [`pipeline`] | The per-tick orchestrator |
//! | [`scheduler`] | Hourly trigger with misfire grace |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Scheduler      │  hourly, second 1, 600s grace
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Ingester       │────▶│ Parameter Store  │
//! └────────┬────────┘     └──────────────────┘
//!          │ per instrument, paced
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ MarketDataSource│────▶│ HTTP Client      │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ normalize_bars  │────▶│ Upsert Writer    │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! Failures and empty results are reported to a [`Notifier`] and never stop
//! the remaining instruments of a tick.

pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod market_data;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;

pub use config::{ConfigError, IngestConfig};
pub use diagnostics::{
    DiagnosticEvent, Level, LocalNotifier, Notifier, RecordingNotifier, RemoteLogNotifier,
};
pub use domain::{Bar, FetchParameter, RawBar, UtcDateTime, DEFAULT_LIMIT, DEFAULT_UNIT};
pub use error::{CoreError, NormalizeError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use market_data::{CoinDeskClient, FetchRequest, MarketDataSource};
pub use normalize::normalize_bars;
pub use ohlcvq_warehouse::{
    BarRecord, ParameterRecord, UpsertReport, Warehouse, WarehouseConfig, WarehouseError,
};
pub use pipeline::{actual_limit, Ingester, Storage, TickOutcome, TickReport};
pub use scheduler::{HourlySchedule, Scheduler, SchedulerHandle};
