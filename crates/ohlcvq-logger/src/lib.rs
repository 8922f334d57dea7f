//! # ohlcvq Logger
//!
//! Log collector service. Producers `POST /logs` with a loosely-typed JSON
//! body; every field is optional and missing ones get defaults before the
//! record is written to the `logs` table.
//!
//! | Route | Response |
//! |-------|----------|
//! | `POST /logs` | `{"status":"logged"}` |
//! | `GET /health` | `{"status":"ok"}` |
//!
//! Storage failures are written to the local log and never surface to the
//! producer.

pub mod config;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use ohlcvq_warehouse::{LogRecord, Warehouse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

pub use config::LoggerConfig;

pub const UNKNOWN_SERVICE: &str = "unknown_service";
pub const UNKNOWN_LEVEL: &str = "unknown";
pub const NO_MESSAGE: &str = "No message provided";

/// Body accepted by `POST /logs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogEntry {
    pub service_name: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
    pub request_id: Option<String>,
    pub meta_info: Option<Map<String, Value>>,
    pub tags: Option<Vec<String>>,
}

impl LogEntry {
    /// Fill defaults and stamp the record with `occurred_at`.
    pub fn into_record(self, occurred_at: OffsetDateTime) -> LogRecord {
        let meta_info = Value::Object(self.meta_info.unwrap_or_default());
        let tags = Value::from(self.tags.unwrap_or_default());

        LogRecord {
            occurred_at: format_timestamp(occurred_at),
            service_name: non_blank(self.service_name)
                .unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
            log_level: non_blank(self.level)
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| UNKNOWN_LEVEL.to_string()),
            message: non_blank(self.message).unwrap_or_else(|| NO_MESSAGE.to_string()),
            stack_trace: non_blank(self.stack_trace),
            request_id: non_blank(self.request_id)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            meta_info: meta_info.to_string(),
            tags: tags.to_string(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn format_timestamp(value: OffsetDateTime) -> String {
    let value = value.to_offset(time::UtcOffset::UTC);
    value
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

pub fn app(warehouse: Warehouse) -> Router {
    Router::new()
        .route("/logs", post(create_log))
        .route("/health", get(health))
        .with_state(warehouse)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_log(State(warehouse): State<Warehouse>, Json(entry): Json<LogEntry>) -> Json<Value> {
    let record = entry.into_record(OffsetDateTime::now_utc());
    echo(&record);

    let stored = tokio::task::spawn_blocking(move || warehouse.insert_log(&record)).await;
    match stored {
        Ok(Ok(id)) => tracing::debug!(id, "log record stored"),
        Ok(Err(error)) => tracing::error!(%error, "failed to store log record"),
        Err(error) => tracing::error!(%error, "log storage task failed"),
    }

    Json(json!({ "status": "logged" }))
}

fn echo(record: &LogRecord) {
    let service = record.service_name.as_str();
    let request_id = record.request_id.as_str();
    match record.log_level.as_str() {
        "debug" => tracing::debug!(service, request_id, "{}", record.message),
        "info" => tracing::info!(service, request_id, "{}", record.message),
        "warning" | "warn" => tracing::warn!(service, request_id, "{}", record.message),
        _ => tracing::error!(
            service,
            request_id,
            level = %record.log_level,
            stack_trace = record.stack_trace.as_deref().unwrap_or(""),
            "{}",
            record.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use ohlcvq_warehouse::WarehouseConfig;
    use time::macros::datetime;
    use tower::ServiceExt;

    fn warehouse() -> Warehouse {
        Warehouse::open(WarehouseConfig::in_memory()).expect("warehouse open")
    }

    async fn post_json(app: Router, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logs")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[test]
    fn empty_entry_gets_every_default() {
        let record = LogEntry::default().into_record(datetime!(2026-10-16 10:00:01 UTC));

        assert_eq!(record.occurred_at, "2026-10-16 10:00:01");
        assert_eq!(record.service_name, "unknown_service");
        assert_eq!(record.log_level, "unknown");
        assert_eq!(record.message, "No message provided");
        assert_eq!(record.stack_trace, None);
        assert!(Uuid::parse_str(&record.request_id).is_ok());
        assert_eq!(record.meta_info, "{}");
        assert_eq!(record.tags, "[]");
    }

    #[test]
    fn level_is_lower_cased_and_blank_message_replaced() {
        let record = LogEntry {
            level: Some("WARNING".to_string()),
            message: Some(String::new()),
            ..LogEntry::default()
        }
        .into_record(datetime!(2026-10-16 10:00:01 UTC));

        assert_eq!(record.log_level, "warning");
        assert_eq!(record.message, "No message provided");
    }

    #[tokio::test]
    async fn posted_entry_is_stored() {
        let warehouse = warehouse();
        let body = r#"{
            "service_name": "coindesk_2019-sda-ohlcv",
            "level": "ERROR",
            "message": "failed to fetch OHLCV data",
            "stack_trace": "timeout",
            "meta_info": {"instrument": "BTC-USD", "limit": 1017},
            "tags": ["fetch", "ohlcv"]
        }"#;

        let (status, json) = post_json(app(warehouse.clone()), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"status": "logged"}));
        let logs = warehouse.recent_logs(10).expect("logs");
        assert_eq!(logs.len(), 1);
        let stored = &logs[0].record;
        assert_eq!(stored.service_name, "coindesk_2019-sda-ohlcv");
        assert_eq!(stored.log_level, "error");
        assert_eq!(stored.stack_trace.as_deref(), Some("timeout"));
        let meta: Value = serde_json::from_str(&stored.meta_info).expect("meta json");
        assert_eq!(meta["limit"], 1017);
        assert_eq!(stored.tags, r#"["fetch","ohlcv"]"#);
    }

    #[tokio::test]
    async fn null_fields_are_treated_as_missing() {
        let warehouse = warehouse();
        let (status, _) = post_json(
            app(warehouse.clone()),
            r#"{"service_name": null, "meta_info": null, "tags": null}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let stored = &warehouse.recent_logs(1).expect("logs")[0].record;
        assert_eq!(stored.service_name, "unknown_service");
        assert_eq!(stored.meta_info, "{}");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app(warehouse())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(json, json!({"status": "ok"}));
    }
}
