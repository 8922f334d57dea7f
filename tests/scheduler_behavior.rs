//! Behavior-driven tests for the hourly ingestion tick
//!
//! These tests drive the `Ingester` against an in-memory warehouse and a
//! scripted market data source, checking what ends up stored and which
//! diagnostics are reported.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ohlcvq_core::{
    CoinDeskClient, FetchRequest, HourlySchedule, HttpClient, HttpError, HttpRequest,
    HttpResponse, Ingester, Level, MarketDataSource, ParameterRecord, RawBar, RecordingNotifier,
    Scheduler, TickOutcome, UtcDateTime, Warehouse, WarehouseConfig,
};
use tempfile::tempdir;
use tokio::sync::Notify;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct ScriptedSource {
    responses: HashMap<String, Vec<RawBar>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedSource {
    fn respond(mut self, instrument: &str, bars: Vec<RawBar>) -> Self {
        self.responses.insert(instrument.to_string(), bars);
        self
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().expect("request log").clone()
    }
}

impl MarketDataSource for ScriptedSource {
    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Vec<RawBar>> + Send + 'a>> {
        let bars = self
            .responses
            .get(&request.instrument)
            .cloned()
            .unwrap_or_default();
        self.requests.lock().expect("request log").push(request);
        Box::pin(async move { bars })
    }
}

fn raw_bar(ts: i64, volume: f64, quote_volume: f64) -> RawBar {
    RawBar::new()
        .with("TIMESTAMP", ts)
        .with("OPEN", 100.0)
        .with("HIGH", 101.0)
        .with("LOW", 99.5)
        .with("CLOSE", 100.5)
        .with("VOLUME", volume)
        .with("QUOTE_VOLUME", quote_volume)
}

fn warehouse_with(parameters: &[(&str, i64)]) -> Warehouse {
    let warehouse = Warehouse::open(WarehouseConfig::in_memory()).expect("warehouse open");
    for (instrument, limit) in parameters {
        warehouse
            .put_parameter(&ParameterRecord {
                instrument: instrument.to_string(),
                unit: "MINUTE".to_string(),
                api_key: format!("key-{instrument}"),
                limit: *limit,
            })
            .expect("parameter insert");
    }
    warehouse
}

fn ingester(
    warehouse: &Warehouse,
    source: Arc<dyn MarketDataSource>,
    notifier: Arc<RecordingNotifier>,
) -> Ingester {
    Ingester::new(warehouse.clone(), source, notifier).with_pacing(Duration::ZERO)
}

fn at(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("timestamp")
}

// =============================================================================
// Tick: Fetch Window
// =============================================================================

#[tokio::test]
async fn when_tick_starts_mid_hour_limit_is_widened_by_elapsed_minutes() {
    // Given: A parameter row requesting 1000 bars
    let warehouse = warehouse_with(&[("BTC-USD", 1000)]);
    let source = Arc::new(ScriptedSource::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source.clone(), notifier);

    // When: The tick starts 17 minutes into the hour
    ingester.run_tick_at(at("2026-10-16T10:17:05Z")).await;

    // Then: The provider is asked for 1017 bars
    let requests = source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].limit, 1017);
    assert_eq!(requests[0].unit, "MINUTE");
    assert_eq!(requests[0].api_key, "key-BTC-USD");
}

#[tokio::test]
async fn when_tick_starts_on_the_hour_limit_is_unchanged() {
    let warehouse = warehouse_with(&[("ETH-USD", 500)]);
    let source = Arc::new(ScriptedSource::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source.clone(), notifier);

    ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    assert_eq!(source.requests()[0].limit, 500);
}

// =============================================================================
// Tick: Empty Inputs
// =============================================================================

#[tokio::test]
async fn when_no_parameters_exist_no_fetch_happens_and_one_warning_is_sent() {
    // Given: An empty parameter store
    let warehouse = warehouse_with(&[]);
    let source = Arc::new(ScriptedSource::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source.clone(), notifier.clone());

    // When: A tick runs
    let outcome = ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    // Then: Nothing is fetched and exactly one warning is reported
    assert_eq!(outcome, TickOutcome::NoParameters);
    assert!(source.requests().is_empty());
    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::Warning);
    assert!(events[0].has_tag("scheduler"));
}

#[tokio::test]
async fn when_provider_returns_nothing_a_warning_names_the_instrument() {
    let warehouse = warehouse_with(&[("BTC-USD", 1000)]);
    let source = Arc::new(ScriptedSource::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source, notifier.clone());

    let outcome = ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    let TickOutcome::Completed(report) = outcome else {
        panic!("expected a completed tick, got {outcome:?}");
    };
    assert_eq!(report.empty, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(notifier.count(Level::Warning), 1);
    let event = &notifier.events()[0];
    assert_eq!(event.meta_info["instrument"], "BTC-USD");
    assert_eq!(event.meta_info["unit"], "MINUTE");
}

// =============================================================================
// Tick: Isolation
// =============================================================================

#[tokio::test]
async fn when_one_instrument_fails_later_instruments_are_still_stored() {
    // Given: The first instrument returns a record without a close price
    let mut broken = raw_bar(1_700_000_060, 1.0, 1.0).into_inner();
    broken.remove("CLOSE");

    let warehouse = warehouse_with(&[("AAA-USD", 10), ("BBB-USD", 10)]);
    let source = Arc::new(
        ScriptedSource::default()
            .respond("AAA-USD", vec![raw_bar(1_700_000_000, 1.0, 1.0), broken.into()])
            .respond("BBB-USD", vec![raw_bar(1_700_000_000, 2.0, 3.0)]),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source.clone(), notifier.clone());

    // When: A tick runs
    let outcome = ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    // Then: The broken batch is not written, the next instrument is
    let TickOutcome::Completed(report) = outcome else {
        panic!("expected a completed tick, got {outcome:?}");
    };
    assert_eq!(source.requests().len(), 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.stored, 1);
    assert_eq!(warehouse.count_bars("AAA-USD", "MINUTE").expect("count"), 0);
    assert_eq!(warehouse.count_bars("BBB-USD", "MINUTE").expect("count"), 1);

    let errors: Vec<_> = notifier
        .events()
        .into_iter()
        .filter(|event| event.level == Level::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].meta_info["instrument"], "AAA-USD");
    assert!(errors[0]
        .stack_trace
        .as_deref()
        .is_some_and(|trace| trace.contains("CLOSE")));
}

/// Answers per instrument; instruments without a route get a 500.
#[derive(Default)]
struct RoutingHttpClient {
    bodies: HashMap<String, String>,
}

impl RoutingHttpClient {
    fn route(mut self, instrument: &str, body: serde_json::Value) -> Self {
        self.bodies.insert(instrument.to_string(), body.to_string());
        self
    }
}

impl HttpClient for RoutingHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = request
            .query_value("instrument")
            .and_then(|instrument| self.bodies.get(instrument))
            .map(|body| HttpResponse::ok_json(body.clone()))
            .unwrap_or_else(|| HttpResponse::with_status(500, r#"{"Err":{"message":"boom"}}"#));
        Box::pin(async move { Ok(response) })
    }
}

#[tokio::test]
async fn when_provider_fails_for_one_instrument_the_next_is_still_stored() {
    // Given: The provider errors for AAA-USD and serves one bar for BBB-USD
    let warehouse = warehouse_with(&[("AAA-USD", 10), ("BBB-USD", 10)]);
    let http = Arc::new(RoutingHttpClient::default().route(
        "BBB-USD",
        serde_json::json!({
            "Data": [{"TIMESTAMP": 1_700_000_000, "OPEN": 1.0, "HIGH": 1.2, "LOW": 0.9,
                      "CLOSE": 1.1, "VOLUME": 4.0, "QUOTE_VOLUME": 4.4}]
        }),
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let source = Arc::new(CoinDeskClient::new(http, notifier.clone()));
    let ingester = ingester(&warehouse, source, notifier.clone());

    // When: A tick runs
    let outcome = ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    // Then: AAA-USD is reported and left empty, BBB-USD is written
    let TickOutcome::Completed(report) = outcome else {
        panic!("expected a completed tick, got {outcome:?}");
    };
    assert_eq!(report.fetched, 2);
    assert_eq!(report.empty, 1);
    assert_eq!(report.stored, 1);
    assert_eq!(warehouse.count_bars("AAA-USD", "MINUTE").expect("count"), 0);
    assert_eq!(warehouse.count_bars("BBB-USD", "MINUTE").expect("count"), 1);

    let errors: Vec<_> = notifier
        .events()
        .into_iter()
        .filter(|event| event.level == Level::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].has_tag("fetch"));
    assert_eq!(errors[0].meta_info["instrument"], "AAA-USD");
    assert_eq!(errors[0].meta_info["status"], 500);
}

#[tokio::test]
async fn when_a_batch_is_rejected_by_storage_the_next_instrument_is_still_stored() {
    // Given: AAA-USD returns a bar whose high is below its low
    let inverted = raw_bar(1_700_000_000, 1.0, 1.0)
        .with("HIGH", 90.0)
        .with("LOW", 95.0);
    let warehouse = warehouse_with(&[("AAA-USD", 10), ("BBB-USD", 10)]);
    let source = Arc::new(
        ScriptedSource::default()
            .respond(
                "AAA-USD",
                vec![raw_bar(1_699_999_940, 1.0, 1.0), inverted],
            )
            .respond("BBB-USD", vec![raw_bar(1_700_000_000, 2.0, 3.0)]),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source, notifier.clone());

    // When: A tick runs
    let outcome = ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    // Then: The whole AAA-USD batch is rolled back and BBB-USD is written
    let TickOutcome::Completed(report) = outcome else {
        panic!("expected a completed tick, got {outcome:?}");
    };
    assert_eq!(report.failed, 1);
    assert_eq!(report.stored, 1);
    assert_eq!(warehouse.count_bars("AAA-USD", "MINUTE").expect("count"), 0);
    assert_eq!(warehouse.count_bars("BBB-USD", "MINUTE").expect("count"), 1);

    assert_eq!(notifier.count(Level::Error), 1);
    let event = &notifier.events()[0];
    assert!(event.message.contains("failed to store bars"));
    assert_eq!(event.meta_info["instrument"], "AAA-USD");
    assert!(event.stack_trace.is_some());
}

#[tokio::test]
async fn when_a_parameter_row_is_invalid_it_is_reported_and_skipped() {
    let warehouse = warehouse_with(&[("BBB-USD", 10)]);
    warehouse
        .put_parameter(&ParameterRecord {
            instrument: "AAA-USD".to_string(),
            unit: "MINUTE".to_string(),
            api_key: "   ".to_string(),
            limit: 10,
        })
        .expect("parameter insert");
    let source = Arc::new(
        ScriptedSource::default().respond("BBB-USD", vec![raw_bar(1_700_000_000, 2.0, 3.0)]),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source.clone(), notifier.clone());

    ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    let requests = source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].instrument, "BBB-USD");
    assert_eq!(notifier.count(Level::Error), 1);
    assert_eq!(warehouse.count_bars("BBB-USD", "MINUTE").expect("count"), 1);
}

// =============================================================================
// Tick: Idempotency
// =============================================================================

#[tokio::test]
async fn when_the_same_window_is_fetched_twice_nothing_is_duplicated() {
    let warehouse = warehouse_with(&[("BTC-USD", 10)]);
    let source = Arc::new(ScriptedSource::default().respond(
        "BTC-USD",
        vec![raw_bar(1_700_000_000, 1.0, 1.0), raw_bar(1_700_000_060, 1.0, 1.0)],
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = ingester(&warehouse, source, notifier.clone());

    let first = ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;
    let second = ingester.run_tick_at(at("2026-10-16T11:00:01Z")).await;

    let (TickOutcome::Completed(first), TickOutcome::Completed(second)) = (first, second) else {
        panic!("both ticks should complete");
    };
    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(warehouse.count_bars("BTC-USD", "MINUTE").expect("count"), 2);
    assert!(notifier.events().is_empty());
}

// =============================================================================
// Tick: End to End
// =============================================================================

struct StaticHttpClient {
    body: String,
}

impl HttpClient for StaticHttpClient {
    fn execute<'a>(
        &'a self,
        _request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let response = HttpResponse::ok_json(self.body.clone());
        Box::pin(async move { Ok(response) })
    }
}

#[tokio::test]
async fn when_provider_returns_one_valid_and_one_idle_bar_only_the_valid_one_is_stored() {
    // Given: A provider returning one traded and one zero-volume bar
    let warehouse = warehouse_with(&[("BTC-USD", 1000)]);
    let http = Arc::new(StaticHttpClient {
        body: serde_json::json!({
            "Data": [
                {"TIMESTAMP": 1_700_000_000, "OPEN": 36_500.0, "HIGH": 36_550.0, "LOW": 36_480.0,
                 "CLOSE": 36_520.0, "VOLUME": 12.5, "QUOTE_VOLUME": 456_500.0},
                {"TIMESTAMP": 1_700_000_060, "OPEN": 36_520.0, "HIGH": 36_520.0, "LOW": 36_520.0,
                 "CLOSE": 36_520.0, "VOLUME": 0, "QUOTE_VOLUME": 0}
            ]
        })
        .to_string(),
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let source = Arc::new(CoinDeskClient::new(http, notifier.clone()));
    let ingester = ingester(&warehouse, source, notifier.clone());

    // When: A tick runs
    ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    // Then: Exactly one row exists, stamped with the UTC instant of the epoch value
    let stored = warehouse
        .recent_bars("BTC-USD", "MINUTE", 10)
        .expect("read bars");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].ts, "2023-11-14 22:13:20");
    assert_eq!(stored[0].close, 36_520.0);
    assert_eq!(stored[0].volume, 12.5);
    assert_eq!(stored[0].quote_volume, 456_500.0);
    assert!(notifier.events().is_empty());
}

// =============================================================================
// Tick: Overlap and Lifecycle
// =============================================================================

struct GatedSource {
    entered: Notify,
    release: Notify,
}

impl MarketDataSource for GatedSource {
    fn fetch<'a>(
        &'a self,
        _request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Vec<RawBar>> + Send + 'a>> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            Vec::new()
        })
    }
}

#[tokio::test]
async fn when_a_tick_is_running_a_second_tick_is_skipped() {
    let warehouse = warehouse_with(&[("BTC-USD", 10)]);
    let source = Arc::new(GatedSource {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = Arc::new(ingester(&warehouse, source.clone(), notifier));

    let running = tokio::spawn({
        let ingester = Arc::clone(&ingester);
        async move { ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await }
    });
    source.entered.notified().await;

    let overlapping = ingester.run_tick_at(at("2026-10-16T10:00:02Z")).await;
    assert_eq!(overlapping, TickOutcome::AlreadyRunning);

    source.release.notify_one();
    let first = running.await.expect("first tick task");
    assert!(matches!(first, TickOutcome::Completed(_)));
}

#[tokio::test]
async fn when_scheduler_is_stopped_before_the_next_hour_it_exits_promptly() {
    let warehouse = warehouse_with(&[]);
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = Arc::new(ingester(
        &warehouse,
        Arc::new(ScriptedSource::default()),
        notifier,
    ));

    let handle = Scheduler::start(ingester, HourlySchedule::default());
    tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("scheduler should stop without waiting for a tick");
}

// =============================================================================
// Tick: Database File Between Ticks
// =============================================================================

#[tokio::test]
async fn when_ingester_reopens_per_tick_the_file_is_free_between_ticks() {
    // Given: A file-backed store and an ingester that opens it per tick
    let temp = tempdir().expect("tempdir");
    let config = WarehouseConfig::at(temp.path().join("ohlcvq.duckdb"));
    let add_parameter = |instrument: &str| {
        let warehouse = Warehouse::open(config.clone()).expect("open for parameters");
        warehouse
            .put_parameter(&ParameterRecord {
                instrument: instrument.to_string(),
                unit: "MINUTE".to_string(),
                api_key: format!("key-{instrument}"),
                limit: 10,
            })
            .expect("parameter insert");
    };
    add_parameter("AAA-USD");

    let source = Arc::new(
        ScriptedSource::default()
            .respond("AAA-USD", vec![raw_bar(1_700_000_000, 1.0, 1.0)])
            .respond("BBB-USD", vec![raw_bar(1_700_000_000, 2.0, 3.0)]),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let ingester = Ingester::new(config.clone(), source, notifier.clone())
        .with_pacing(Duration::ZERO);

    ingester.run_tick_at(at("2026-10-16T10:00:01Z")).await;

    // When: Another handle edits the parameters while the ingester is idle
    add_parameter("BBB-USD");
    let second = ingester.run_tick_at(at("2026-10-16T11:00:01Z")).await;

    // Then: The next tick sees the new row and both instruments are stored
    let TickOutcome::Completed(report) = second else {
        panic!("expected a completed tick, got {second:?}");
    };
    assert_eq!(report.parameters, 2);
    let warehouse = Warehouse::open(config).expect("reopen");
    assert_eq!(warehouse.count_bars("AAA-USD", "MINUTE").expect("count"), 1);
    assert_eq!(warehouse.count_bars("BBB-USD", "MINUTE").expect("count"), 1);
    assert!(notifier.events().is_empty());
}
