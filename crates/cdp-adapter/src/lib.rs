//! Chromium DevTools Protocol page driver for webui-probe.
//!
//! This crate owns the browser side of a probe run: launching Chromium through
//! chromiumoxide, holding the single page the probe talks to, and resolving
//! declarative [`Locator`]s inside that page. Higher layers only see the
//! [`PageDriver`] trait so they can be exercised against scripted pages.

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("target element not found")]
        TargetNotFound,
        #[error("wait timed out")]
        WaitTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("browser launch failed")]
        Launch,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self { kind, hint: None }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }
    }

    impl From<chromiumoxide::error::CdpError> for AdapterError {
        fn from(err: chromiumoxide::error::CdpError) -> Self {
            AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
        }
    }
}

pub mod events {
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::sync::Arc;

    /// Marker the MarketBot UI uses for executor progress frames.
    pub const EXECUTOR_UPDATE_MARKER: &str = "executor.update";

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ConsoleEntry {
        pub level: String,
        pub text: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BadResponse {
        pub status: i64,
        pub url: String,
        pub resource_type: String,
    }

    /// A terminal (`COMPLETED` or `FAILED`) executor update pushed over the
    /// UI's websocket.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ExecutorUpdate {
        pub action_id: Option<String>,
        pub status: String,
        pub has_output: bool,
        pub output_keys: Option<Vec<String>>,
        pub error: Option<String>,
    }

    impl ExecutorUpdate {
        /// Reads the `payload` of an `executor.update` frame. `None` for
        /// frames that are not JSON or carry no status.
        pub fn parse(frame: &str) -> Option<Self> {
            let frame: Value = serde_json::from_str(frame).ok()?;
            let payload = frame.get("payload")?;
            let status = payload.get("status")?.as_str()?.to_string();
            let output = payload.get("output");
            Some(Self {
                action_id: payload.get("actionId").and_then(scalar_text),
                status,
                has_output: output.is_some(),
                output_keys: output
                    .and_then(Value::as_object)
                    .map(|object| object.keys().cloned().collect()),
                error: payload.get("error").and_then(scalar_text),
            })
        }

        pub fn is_terminal(&self) -> bool {
            matches!(self.status.as_str(), "COMPLETED" | "FAILED")
        }

        pub fn failed(&self) -> bool {
            self.status == "FAILED"
        }
    }

    fn scalar_text(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WebSocketRecord {
        pub request_id: String,
        pub url: String,
        pub closed: bool,
    }

    /// Everything the page reported on its own while the probe was driving it.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PageDiagnostics {
        pub console_errors: Vec<ConsoleEntry>,
        pub page_errors: Vec<String>,
        pub bad_responses: Vec<BadResponse>,
        pub websockets: Vec<WebSocketRecord>,
        /// Every frame mentioning `executor.update`, parseable or not.
        pub executor_updates: u64,
        pub executor_results: Vec<ExecutorUpdate>,
    }

    impl PageDiagnostics {
        pub fn has_problems(&self) -> bool {
            !self.console_errors.is_empty()
                || !self.page_errors.is_empty()
                || !self.bad_responses.is_empty()
                || self.executor_results.iter().any(ExecutorUpdate::failed)
        }
    }

    /// Shared collector written by the session's event listeners.
    #[derive(Clone, Debug, Default)]
    pub struct DiagnosticsSink {
        inner: Arc<Mutex<PageDiagnostics>>,
    }

    impl DiagnosticsSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Keeps `error` and `warning` console calls; everything else is noise.
        pub fn record_console(&self, level: &str, text: impl Into<String>) {
            let level = level.to_ascii_lowercase();
            if matches!(level.as_str(), "error" | "warning") {
                self.inner.lock().console_errors.push(ConsoleEntry {
                    level,
                    text: text.into(),
                });
            }
        }

        pub fn record_page_error(&self, message: impl Into<String>) {
            self.inner.lock().page_errors.push(message.into());
        }

        pub fn record_response(&self, status: i64, url: &str, resource_type: &str) {
            let resource_type = resource_type.to_ascii_lowercase();
            if status >= 400 && matches!(resource_type.as_str(), "document" | "xhr" | "fetch") {
                self.inner.lock().bad_responses.push(BadResponse {
                    status,
                    url: url.to_string(),
                    resource_type,
                });
            }
        }

        pub fn record_ws_opened(&self, request_id: &str, url: &str) {
            self.inner.lock().websockets.push(WebSocketRecord {
                request_id: request_id.to_string(),
                url: url.to_string(),
                closed: false,
            });
        }

        /// Marks the socket closed and returns its URL, if it was seen opening.
        pub fn record_ws_closed(&self, request_id: &str) -> Option<String> {
            let mut inner = self.inner.lock();
            let socket = inner
                .websockets
                .iter_mut()
                .find(|socket| socket.request_id == request_id)?;
            socket.closed = true;
            Some(socket.url.clone())
        }

        /// Counts executor frames and returns the update when it is terminal.
        pub fn record_ws_frame(&self, payload: &str) -> Option<ExecutorUpdate> {
            if !payload.contains(EXECUTOR_UPDATE_MARKER) {
                return None;
            }
            let update = ExecutorUpdate::parse(payload).filter(ExecutorUpdate::is_terminal);
            let mut inner = self.inner.lock();
            inner.executor_updates += 1;
            if let Some(update) = &update {
                inner.executor_results.push(update.clone());
            }
            update
        }

        pub fn snapshot(&self) -> PageDiagnostics {
            self.inner.lock().clone()
        }
    }

}

pub mod adapter;
pub mod commands;
pub mod config;
pub mod metrics;
pub mod network;

pub use adapter::{ChromiumSession, PageDriver};
pub use commands::{Anchor, Locator};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::{DiagnosticsSink, ExecutorUpdate, PageDiagnostics, WebSocketRecord};
pub use metrics::CommandStats;
pub use network::NetworkQuietTracker;
