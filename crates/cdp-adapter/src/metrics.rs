//! Page command accounting.
//!
//! Every driver command runs under a [`CommandTimer`]. Timings land in a
//! crate-local prometheus registry and in a per-command tally the runner
//! reads back once a probe has finished.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{core::Collector, histogram_opts, Encoder, HistogramVec, IntCounterVec, Opts, Registry};
use serde::Serialize;
use tracing::error;

use crate::error::AdapterError;

/// Totals for one page command since process start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    pub calls: u64,
    pub failures: u64,
    pub total_ms: u64,
    pub slowest_ms: u64,
}

impl CommandStats {
    fn observe(&mut self, elapsed: Duration, ok: bool) {
        let millis = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self.calls += 1;
        if !ok {
            self.failures += 1;
        }
        self.total_ms = self.total_ms.saturating_add(millis);
        self.slowest_ms = self.slowest_ms.max(millis);
    }
}

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref COMMAND_SECONDS: HistogramVec = registered(
        HistogramVec::new(
            histogram_opts!(
                "webui_probe_page_command_seconds",
                "Page command latency by outcome",
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
            ),
            &["command", "outcome"]
        )
        .unwrap()
    );
    static ref PAGE_EVENTS: IntCounterVec = registered(
        IntCounterVec::new(
            Opts::new("webui_probe_page_events_total", "Page events seen by the listeners"),
            &["event"]
        )
        .unwrap()
    );
    static ref TALLY: Mutex<BTreeMap<&'static str, CommandStats>> = Mutex::new(BTreeMap::new());
}

fn registered<C>(collector: C) -> C
where
    C: Collector + Clone + 'static,
{
    if let Err(err) = REGISTRY.register(Box::new(collector.clone())) {
        error!(?err, "failed to register page metric");
    }
    collector
}

/// Measures one command from creation until [`CommandTimer::finish`].
#[must_use]
pub struct CommandTimer {
    command: &'static str,
    started: Instant,
}

impl CommandTimer {
    pub fn start(command: &'static str) -> Self {
        Self {
            command,
            started: Instant::now(),
        }
    }

    /// Records the outcome and hands it back unchanged.
    pub fn finish<T>(self, outcome: Result<T, AdapterError>) -> Result<T, AdapterError> {
        let elapsed = self.started.elapsed();
        let ok = outcome.is_ok();
        COMMAND_SECONDS
            .with_label_values(&[self.command, if ok { "ok" } else { "error" }])
            .observe(elapsed.as_secs_f64());
        TALLY
            .lock()
            .entry(self.command)
            .or_default()
            .observe(elapsed, ok);
        outcome
    }
}

pub fn record_event(event: &str) {
    PAGE_EVENTS.with_label_values(&[event]).inc();
}

/// Per-command totals, ordered by command name.
pub fn command_stats() -> Vec<(&'static str, CommandStats)> {
    TALLY
        .lock()
        .iter()
        .map(|(command, stats)| (*command, *stats))
        .collect()
}

/// Renders every page metric in the Prometheus text format.
pub fn render_text() -> String {
    let mut buffer = Vec::new();
    if let Err(err) = prometheus::TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        error!(?err, "failed to encode page metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;

    fn stats_for(command: &str) -> CommandStats {
        command_stats()
            .into_iter()
            .find(|(name, _)| *name == command)
            .map(|(_, stats)| stats)
            .unwrap_or_default()
    }

    #[test]
    fn timer_tallies_calls_and_failures_per_command() {
        let ok = CommandTimer::start("tally_test").finish(Ok::<_, AdapterError>(3));
        assert_eq!(ok.unwrap(), 3);
        let failed = CommandTimer::start("tally_test")
            .finish::<()>(Err(AdapterError::new(AdapterErrorKind::WaitTimeout)));
        assert!(failed.is_err());

        let stats = stats_for("tally_test");
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failures, 1);
        assert!(stats.slowest_ms <= stats.total_ms);
    }

    #[test]
    fn rendered_text_carries_commands_and_events() {
        CommandTimer::start("render_test")
            .finish(Ok::<_, AdapterError>(()))
            .unwrap();
        record_event("console");
        let text = render_text();
        assert!(text.contains("webui_probe_page_command_seconds"));
        assert!(text.contains(r#"command="render_test""#));
        assert!(text.contains("webui_probe_page_events_total"));
    }
}
