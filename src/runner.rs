//! Session lifecycle around a probe run.
//!
//! The browser is acquired in [`run_probe`] and released on every path,
//! including fatal probe failures.

use std::io::Write;

use async_trait::async_trait;
use cdp_adapter::{metrics, ChromiumSession, PageDriver};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::errors::{ProbeError, ProbeResult};
use crate::probe::Probe;
use crate::report::RunReport;

/// A page driver that owns resources to give back when the run ends.
#[async_trait]
pub trait SessionHandle: PageDriver + Sized {
    /// Tear the session down. Failures are logged, never returned.
    async fn release(self);
}

#[async_trait]
impl SessionHandle for ChromiumSession {
    async fn release(self) {
        match self.close().await {
            Ok(()) => info!("browser session closed"),
            Err(err) => warn!(%err, "browser session did not close cleanly"),
        }
    }
}

/// Run the probe against `driver`, print the results to `out`, save the
/// screenshot and, if configured, the JSON report.
pub async fn run_with_driver<D: PageDriver + ?Sized>(
    driver: &D,
    config: &ProbeConfig,
    out: &mut dyn Write,
) -> ProbeResult<RunReport> {
    let started_at = Utc::now();
    let probe = Probe::new(driver, config);
    let outcome = probe.run().await?;

    out.write_all(outcome.result.render().as_bytes())?;
    out.flush()?;

    let screenshot = probe.capture_screenshot().await?;

    let diagnostics = driver.diagnostics();
    if diagnostics.has_problems() {
        warn!(
            console_errors = diagnostics.console_errors.len(),
            page_errors = diagnostics.page_errors.len(),
            bad_responses = diagnostics.bad_responses.len(),
            "page reported problems during the run"
        );
        for response in &diagnostics.bad_responses {
            warn!(status = response.status, url = %response.url, kind = %response.resource_type, "bad response");
        }
        for message in &diagnostics.page_errors {
            warn!(%message, "uncaught page error");
        }
    }
    for socket in &diagnostics.websockets {
        debug!(url = %socket.url, closed = socket.closed, "websocket seen");
    }
    for update in &diagnostics.executor_results {
        let action = update.action_id.as_deref().unwrap_or("-");
        let keys = update.output_keys.as_deref().unwrap_or_default().join(",");
        if update.failed() {
            warn!(
                action,
                status = %update.status,
                has_output = update.has_output,
                output_keys = %keys,
                error = update.error.as_deref().unwrap_or(""),
                "executor action failed"
            );
        } else {
            info!(
                action,
                status = %update.status,
                has_output = update.has_output,
                output_keys = %keys,
                "executor action finished"
            );
        }
    }
    info!(
        updates = diagnostics.executor_updates,
        finished = diagnostics.executor_results.len(),
        websockets = diagnostics.websockets.len(),
        "executor updates received"
    );

    let report = RunReport {
        target: config.redacted_url(),
        prompt: config.prompt.clone(),
        started_at,
        finished_at: Utc::now(),
        settled: outcome.settled,
        page_title: outcome.page_title,
        result: outcome.result,
        steps: outcome.steps,
        screenshot,
        diagnostics,
        output_texts: outcome.output_texts,
    };
    if let Some(path) = &config.json_report {
        report.write_json(path).await?;
    }

    for step in &report.steps {
        info!(step = %step.step, elapsed_ms = step.elapsed_ms, "step timing");
    }
    for (command, stats) in metrics::command_stats() {
        info!(
            command,
            calls = stats.calls,
            failures = stats.failures,
            total_ms = stats.total_ms,
            slowest_ms = stats.slowest_ms,
            "page command totals"
        );
    }
    debug!("page command metrics\n{}", metrics::render_text());
    Ok(report)
}

/// Run the probe and release `session` afterwards, whatever the outcome.
pub async fn run_in_session<S: SessionHandle>(
    session: S,
    config: &ProbeConfig,
    out: &mut dyn Write,
) -> ProbeResult<RunReport> {
    let outcome = run_with_driver(&session, config, out).await;
    if let Err(err) = &outcome {
        warn!(kind = err.kind(), "probe aborted, releasing session");
    }
    session.release().await;
    outcome
}

/// Launch Chromium and run one probe against it.
pub async fn run_probe(config: &ProbeConfig, out: &mut dyn Write) -> ProbeResult<RunReport> {
    let session = ChromiumSession::launch(config.browser.clone())
        .await
        .map_err(ProbeError::Launch)?;
    run_in_session(session, config, out).await
}
