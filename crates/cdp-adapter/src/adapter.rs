use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, EventResponseReceived, EventWebSocketClosed, EventWebSocketCreated,
    EventWebSocketFrameReceived,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{
    EnableParams as RuntimeEnableParams, EvaluateParams, EventConsoleApiCalled,
    EventExceptionThrown, RemoteObject,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::commands::{Anchor, AttributeProbe, Locator};
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::{DiagnosticsSink, PageDiagnostics};
use crate::metrics::{self, CommandTimer};
use crate::network::NetworkQuietTracker;

const WAIT_POLL: Duration = Duration::from_millis(100);

/// The page capability surface the probe drives.
///
/// Every call targets the session's single page. Waiting calls take a
/// deadline relative to the moment they are invoked.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url` and block until the network has been quiet for the
    /// configured window.
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), AdapterError>;

    /// Number of elements currently matching `locator`. Never waits.
    async fn count(&self, locator: &Locator) -> Result<usize, AdapterError>;

    /// Block until at least one element matches.
    async fn wait_for(&self, locator: &Locator, deadline: Duration) -> Result<(), AdapterError>;

    /// Replace the value of the first match with `text`.
    async fn fill(
        &self,
        locator: &Locator,
        text: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError>;

    /// Click the center of the `index`-th match.
    async fn click(
        &self,
        locator: &Locator,
        index: usize,
        deadline: Duration,
    ) -> Result<(), AdapterError>;

    /// Rendered text of the `index`-th match, waiting for it to exist.
    async fn inner_text(
        &self,
        locator: &Locator,
        index: usize,
        deadline: Duration,
    ) -> Result<String, AdapterError>;

    /// Attribute of the `index`-th match; `Ok(None)` when the attribute is absent.
    async fn attribute(
        &self,
        locator: &Locator,
        index: usize,
        name: &str,
    ) -> Result<Option<String>, AdapterError>;

    /// PNG bytes of the viewport, or of the whole document when `full_page`.
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, AdapterError>;

    /// The document title, `None` when the page has none.
    async fn title(&self) -> Result<Option<String>, AdapterError>;

    fn diagnostics(&self) -> PageDiagnostics;
}

/// A launched Chromium with exactly one page.
///
/// Dropping the session aborts its background tasks; call
/// [`ChromiumSession::close`] to also shut the browser process down cleanly.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    cfg: CdpConfig,
    network: Arc<Mutex<NetworkQuietTracker>>,
    diagnostics: DiagnosticsSink,
    handler_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
}

impl ChromiumSession {
    pub async fn launch(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let mut builder = BrowserConfig::builder()
            .window_size(cfg.window_width, cfg.window_height)
            .request_timeout(Duration::from_millis(cfg.request_timeout_ms));
        match cfg.resolve_executable() {
            Some(path) => {
                debug!(path = %path.display(), "using chromium binary");
                builder = builder.chrome_executable(path);
            }
            None => warn!("no chromium binary found, falling back to chromiumoxide discovery"),
        }
        if !cfg.headless {
            builder = builder.with_head();
        }
        if !cfg.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(dir) = &cfg.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        for arg in &cfg.extra_args {
            builder = builder.arg(arg.as_str());
        }
        let browser_config = builder
            .build()
            .map_err(|err| AdapterError::new(AdapterErrorKind::Launch).with_hint(err))?;

        info!(headless = cfg.headless, "launching chromium");
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::Launch).with_hint(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(%err, "cdp handler reported an error");
                }
            }
            debug!("cdp handler loop ended");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                handler_task.abort();
                return Err(AdapterError::new(AdapterErrorKind::Launch)
                    .with_hint(format!("failed to open page: {err}")));
            }
        };

        let network = Arc::new(Mutex::new(NetworkQuietTracker::new(Instant::now())));
        let diagnostics = DiagnosticsSink::new();
        let listener_task =
            match spawn_listeners(&page, Arc::clone(&network), diagnostics.clone()).await {
                Ok(task) => task,
                Err(err) => {
                    handler_task.abort();
                    return Err(err);
                }
            };

        Ok(Self {
            browser,
            page,
            cfg,
            network,
            diagnostics,
            handler_task,
            listener_task,
        })
    }

    /// Close the browser and wait for the child process to exit.
    pub async fn close(mut self) -> Result<(), AdapterError> {
        self.listener_task.abort();
        let closed = self.browser.close().await.map(|_| ());
        if let Err(err) = self.browser.wait().await {
            warn!(%err, "failed to reap chromium process");
        }
        self.handler_task.abort();
        closed.map_err(AdapterError::from)
    }

    async fn evaluate<T: DeserializeOwned>(
        &self,
        command: &'static str,
        script: String,
    ) -> Result<T, AdapterError> {
        let timer = CommandTimer::start(command);
        timer.finish(self.evaluate_inner(script).await)
    }

    async fn evaluate_inner<T: DeserializeOwned>(&self, script: String) -> Result<T, AdapterError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err))?;
        let result = self.page.evaluate_expression(params).await?;
        let value = result.value().cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("unexpected evaluation result: {err}"))
        })
    }

    async fn wait_for_network_quiet(&self, deadline: Instant) -> Result<(), AdapterError> {
        let window = Duration::from_millis(self.cfg.network_quiet_window_ms);
        loop {
            let now = Instant::now();
            let (quiet, inflight) = {
                let tracker = self.network.lock();
                (
                    tracker.is_quiet(now, window, self.cfg.network_max_inflight),
                    tracker.inflight(),
                )
            };
            if quiet {
                return Ok(());
            }
            if now >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint(format!("network still busy ({inflight} requests in flight)")));
            }
            sleep(WAIT_POLL).await;
        }
    }

    /// Polls `script` until it yields a value or the deadline passes.
    async fn poll_for<T: DeserializeOwned>(
        &self,
        command: &'static str,
        script: &str,
        what: &str,
        deadline: Duration,
    ) -> Result<T, AdapterError> {
        poll_within(deadline, || self.evaluate::<Option<T>>(command, script.to_string()))
            .await
            .map_err(|last_error| wait_timeout(what.to_string(), last_error))
    }
}

/// Retries `attempt` every [`WAIT_POLL`] until it yields a value. Each
/// attempt is cut off at the deadline; on expiry the last attempt error, if
/// any, is returned.
async fn poll_within<T, F, Fut>(deadline: Duration, mut attempt: F) -> Result<T, Option<AdapterError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, AdapterError>>,
{
    let deadline_at = Instant::now() + deadline;
    let mut last_error = None;
    loop {
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, attempt()).await {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => last_error = Some(err),
            Err(_) => return Err(last_error),
        }
        let now = Instant::now();
        if now >= deadline_at {
            return Err(last_error);
        }
        sleep(WAIT_POLL.min(deadline_at - now)).await;
    }
}

fn wait_timeout(mut hint: String, last_error: Option<AdapterError>) -> AdapterError {
    if let Some(err) = last_error {
        hint.push_str(&format!(" (last error: {err})"));
    }
    AdapterError::new(AdapterErrorKind::WaitTimeout).with_hint(hint)
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.listener_task.abort();
        self.handler_task.abort();
    }
}

#[async_trait]
impl PageDriver for ChromiumSession {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), AdapterError> {
        let timer = CommandTimer::start("navigate");
        let started = Instant::now();
        self.network.lock().reset(started);

        let outcome = match tokio::time::timeout(deadline, self.page.goto(url)).await {
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("page load exceeded {}ms", deadline.as_millis()))),
            Ok(Err(err)) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("navigation failed: {err}"))),
            Ok(Ok(_)) => self.wait_for_network_quiet(started + deadline).await,
        };
        timer.finish(outcome)
    }

    async fn count(&self, locator: &Locator) -> Result<usize, AdapterError> {
        self.evaluate("count", locator.count_script()).await
    }

    async fn wait_for(&self, locator: &Locator, deadline: Duration) -> Result<(), AdapterError> {
        poll_within(deadline, || async {
            self.count(locator)
                .await
                .map(|found| (found > 0).then_some(()))
        })
        .await
        .map_err(|last_error| {
            let hint = format!(
                "{} not present after {}ms",
                locator.describe(),
                deadline.as_millis()
            );
            wait_timeout(hint, last_error)
        })
    }

    async fn fill(
        &self,
        locator: &Locator,
        text: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        self.wait_for(locator, deadline).await?;
        let focused: bool = self
            .evaluate("fill", locator.prepare_fill_script())
            .await?;
        if !focused {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("{} disappeared before fill", locator.describe())));
        }
        self.page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn click(
        &self,
        locator: &Locator,
        index: usize,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let anchor: Anchor = self
            .poll_for(
                "click",
                &locator.anchor_script(index),
                &format!("{}[{index}] not clickable", locator.describe()),
                deadline,
            )
            .await
            .map_err(|err| AdapterError {
                kind: AdapterErrorKind::TargetNotFound,
                hint: err.hint,
            })?;
        debug!(target = %locator.describe(), index, x = anchor.x, y = anchor.y, "clicking element");
        self.page.click(Point { x: anchor.x, y: anchor.y }).await?;
        Ok(())
    }

    async fn inner_text(
        &self,
        locator: &Locator,
        index: usize,
        deadline: Duration,
    ) -> Result<String, AdapterError> {
        self.poll_for(
            "inner_text",
            &locator.inner_text_script(index),
            &format!("{}[{index}] has no text", locator.describe()),
            deadline,
        )
        .await
    }

    async fn attribute(
        &self,
        locator: &Locator,
        index: usize,
        name: &str,
    ) -> Result<Option<String>, AdapterError> {
        let probe: AttributeProbe = self
            .evaluate("attribute", locator.attribute_script(index, name))
            .await?;
        if !probe.found {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("{}[{index}] not found", locator.describe())));
        }
        Ok(probe.value)
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, AdapterError> {
        let timer = CommandTimer::start("screenshot");
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        timer.finish(self.page.screenshot(params).await.map_err(AdapterError::from))
    }

    async fn title(&self) -> Result<Option<String>, AdapterError> {
        let timer = CommandTimer::start("title");
        timer.finish(self.page.get_title().await.map_err(AdapterError::from))
    }

    fn diagnostics(&self) -> PageDiagnostics {
        self.diagnostics.snapshot()
    }
}

async fn spawn_listeners(
    page: &Page,
    network: Arc<Mutex<NetworkQuietTracker>>,
    diagnostics: DiagnosticsSink,
) -> Result<JoinHandle<()>, AdapterError> {
    page.execute(NetworkEnableParams::default()).await?;
    page.execute(RuntimeEnableParams::default()).await?;

    let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut console = page.event_listener::<EventConsoleApiCalled>().await?;
    let mut exceptions = page.event_listener::<EventExceptionThrown>().await?;
    let mut frames = page.event_listener::<EventWebSocketFrameReceived>().await?;
    let mut sockets_opened = page.event_listener::<EventWebSocketCreated>().await?;
    let mut sockets_closed = page.event_listener::<EventWebSocketClosed>().await?;

    Ok(tokio::spawn(async move {
        loop {
            let kind = tokio::select! {
                Some(event) = requests.next() => {
                    network.lock().request_started(event.request_id.inner(), Instant::now());
                    "request"
                }
                Some(event) = finished.next() => {
                    network.lock().request_finished(event.request_id.inner(), Instant::now());
                    "request"
                }
                Some(event) = failed.next() => {
                    network.lock().request_finished(event.request_id.inner(), Instant::now());
                    "request"
                }
                Some(event) = responses.next() => {
                    let resource_type = format!("{:?}", event.r#type);
                    diagnostics.record_response(event.response.status, &event.response.url, &resource_type);
                    "response"
                }
                Some(event) = console.next() => {
                    let level = format!("{:?}", event.r#type);
                    let text = event
                        .args
                        .iter()
                        .map(remote_object_text)
                        .collect::<Vec<_>>()
                        .join(" ");
                    diagnostics.record_console(&level, text);
                    "console"
                }
                Some(event) = exceptions.next() => {
                    let details = &event.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|exception| exception.description.clone())
                        .unwrap_or_else(|| details.text.clone());
                    debug!(%message, "uncaught page error");
                    diagnostics.record_page_error(message);
                    "exception"
                }
                Some(event) = sockets_opened.next() => {
                    info!(url = %event.url, "websocket opened");
                    diagnostics.record_ws_opened(event.request_id.inner(), &event.url);
                    "websocket"
                }
                Some(event) = sockets_closed.next() => {
                    if let Some(url) = diagnostics.record_ws_closed(event.request_id.inner()) {
                        info!(%url, "websocket closed");
                    }
                    "websocket"
                }
                Some(event) = frames.next() => {
                    if let Some(update) = diagnostics.record_ws_frame(&event.response.payload_data) {
                        debug!(action_id = ?update.action_id, status = %update.status, "executor update");
                    }
                    "websocket"
                }
                else => break,
            };
            metrics::record_event(kind);
        }
        debug!("page event listeners finished");
    }))
}

fn remote_object_text(object: &RemoteObject) -> String {
    match &object.value {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => object.description.clone().unwrap_or_default(),
    }
}
