use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;

use crate::diagnostics::{DiagnosticEvent, Notifier};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::RawBar;

/// CoinDesk historical minutes endpoint.
pub const DEFAULT_PROVIDER_URL: &str =
    "https://data-api.coindesk.com/index/cc/v1/historical/minutes";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// One bounded bar request for an (instrument, unit) pair.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub instrument: String,
    pub api_key: String,
    pub limit: u32,
    pub unit: String,
}

impl std::fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRequest")
            .field("instrument", &self.instrument)
            .field("limit", &self.limit)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

/// Anything that can hand the pipeline raw bars for one instrument.
///
/// Fetching never fails from the caller's point of view: problems are reported
/// out-of-band and surface as an empty result.
pub trait MarketDataSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Vec<RawBar>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct MinutesResponse {
    #[serde(rename = "Data", default)]
    data: Option<Vec<RawBar>>,
}

/// Market data client for the CoinDesk index API.
#[derive(Clone)]
pub struct CoinDeskClient {
    http_client: Arc<dyn HttpClient>,
    notifier: Arc<dyn Notifier>,
    base_url: String,
    timeout_ms: u64,
}

impl CoinDeskClient {
    pub fn new(http_client: Arc<dyn HttpClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            http_client,
            notifier,
            base_url: String::from(DEFAULT_PROVIDER_URL),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn build_request(&self, request: &FetchRequest) -> HttpRequest {
        HttpRequest::get(&self.base_url)
            .with_query("market", "sda")
            .with_query("instrument", &request.instrument)
            .with_query("limit", request.limit)
            .with_query("unit", &request.unit)
            .with_query("groups", "OHLC,VOLUME")
            .with_auth(&HttpAuth::ApiKey(request.api_key.clone()))
            .with_timeout_ms(self.timeout_ms)
    }

    fn report_failure(&self, request: &FetchRequest, event: DiagnosticEvent) -> Vec<RawBar> {
        self.notifier.notify(
            event
                .with_meta("instrument", request.instrument.as_str())
                .with_meta("limit", request.limit)
                .with_meta("unit", request.unit.as_str())
                .with_tags(["fetch", "ohlcv"]),
        );
        Vec::new()
    }
}

impl MarketDataSource for CoinDeskClient {
    fn fetch<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Vec<RawBar>> + Send + 'a>> {
        Box::pin(async move {
            let http_request = self.build_request(&request);

            let response = match self.http_client.execute(http_request).await {
                Ok(response) => response,
                Err(error) => {
                    return self.report_failure(
                        &request,
                        DiagnosticEvent::error(format!("failed to fetch OHLCV data: {error}"))
                            .with_error_chain(&error)
                            .with_meta("timeout", error.is_timeout()),
                    );
                }
            };

            if !response.is_success() {
                return self.report_failure(
                    &request,
                    DiagnosticEvent::error(format!(
                        "failed to fetch OHLCV data: upstream returned status {}",
                        response.status
                    ))
                    .with_meta("status", response.status),
                );
            }

            match serde_json::from_str::<MinutesResponse>(&response.body) {
                Ok(decoded) => {
                    let bars = decoded.data.unwrap_or_default();
                    tracing::debug!(
                        instrument = %request.instrument,
                        unit = %request.unit,
                        limit = request.limit,
                        received = bars.len(),
                        "fetched OHLCV bars"
                    );
                    bars
                }
                Err(error) => self.report_failure(
                    &request,
                    DiagnosticEvent::error(format!("unexpected OHLCV response body: {error}"))
                        .with_error_chain(&error),
                ),
            }
        })
    }
}
