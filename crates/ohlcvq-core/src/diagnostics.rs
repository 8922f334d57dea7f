//! Best-effort diagnostic events.
//!
//! Pipeline code reports failures and empty results through a [`Notifier`].
//! Notifying cannot fail and never blocks the caller: events are mirrored to
//! the local `tracing` log and, when a remote sink is configured, posted to it
//! from a background task.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::error::error_chain;
use crate::http_client::{HttpClient, HttpError, HttpRequest};

/// Severity of a diagnostic event, serialized upper-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An out-of-band record describing something the pipeline noticed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub level: Level,
    pub message: String,
    pub stack_trace: Option<String>,
    pub meta_info: Map<String, Value>,
    pub tags: Vec<String>,
}

impl DiagnosticEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            stack_trace: None,
            meta_info: Map::new(),
            tags: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta_info.insert(key.into(), value.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Use the rendered `source()` chain of `error` as stack context.
    pub fn with_error_chain(self, error: &(dyn std::error::Error + 'static)) -> Self {
        self.with_stack_trace(error_chain(error))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    /// Wire body accepted by the log collector.
    pub fn to_payload(&self, service_name: &str) -> Value {
        serde_json::json!({
            "service_name": service_name,
            "level": self.level,
            "message": self.message,
            "stack_trace": self.stack_trace,
            "meta_info": self.meta_info,
            "tags": self.tags,
        })
    }
}

/// Sink for diagnostic events. Implementations must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: DiagnosticEvent);
}

/// Mirror an event into the local `tracing` log at its own level.
pub fn log_locally(service_name: &str, event: &DiagnosticEvent) {
    let meta = Value::Object(event.meta_info.clone());
    let tags = event.tags.join(",");
    let stack = event.stack_trace.as_deref().unwrap_or("");
    match event.level {
        Level::Debug => {
            tracing::debug!(service_name, %meta, tags = %tags, stack, "{}", event.message)
        }
        Level::Info => tracing::info!(service_name, %meta, tags = %tags, stack, "{}", event.message),
        Level::Warning => {
            tracing::warn!(service_name, %meta, tags = %tags, stack, "{}", event.message)
        }
        Level::Error | Level::Critical => {
            tracing::error!(service_name, level = %event.level, %meta, tags = %tags, stack, "{}", event.message)
        }
    }
}

/// Notifier that only writes to the local log. Used when no sink is configured.
#[derive(Debug, Clone)]
pub struct LocalNotifier {
    service_name: String,
}

impl LocalNotifier {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl Notifier for LocalNotifier {
    fn notify(&self, event: DiagnosticEvent) {
        log_locally(&self.service_name, &event);
    }
}

/// Notifier that posts events to the log collector's `POST /logs` endpoint.
#[derive(Clone)]
pub struct RemoteLogNotifier {
    http_client: Arc<dyn HttpClient>,
    url: String,
    service_name: String,
    timeout_ms: u64,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RemoteLogNotifier {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        url: impl Into<String>,
        service_name: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            http_client,
            url: url.into(),
            service_name: service_name.into(),
            timeout_ms,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wait for deliveries started so far. Each is bounded by the request timeout.
    pub async fn flush(&self) {
        let pending: Vec<JoinHandle<()>> = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in pending {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "remote log delivery task failed");
            }
        }
    }

    /// Post one event and wait for the outcome.
    pub fn deliver(
        &self,
        event: &DiagnosticEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HttpError>> + Send + '_>> {
        let request = HttpRequest::post(&self.url)
            .with_json_body(event.to_payload(&self.service_name).to_string())
            .with_timeout_ms(self.timeout_ms);
        Box::pin(async move {
            let response = self.http_client.execute(request).await?;
            if response.is_success() {
                Ok(())
            } else {
                Err(HttpError::new(format!(
                    "log sink returned status {}",
                    response.status
                )))
            }
        })
    }
}

impl Notifier for RemoteLogNotifier {
    fn notify(&self, event: DiagnosticEvent) {
        log_locally(&self.service_name, &event);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime available; diagnostic kept in local log only");
            return;
        };

        let notifier = self.clone();
        let handle = runtime.spawn(async move {
            if let Err(error) = notifier.deliver(&event).await {
                tracing::error!(url = %notifier.url, %error, "remote log delivery failed");
            }
        });

        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.retain(|pending| !pending.is_finished());
        in_flight.push(handle);
    }
}

/// Notifier that keeps events in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.events()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: DiagnosticEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
