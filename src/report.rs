//! Run results and their console / JSON renderings.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cdp_adapter::PageDiagnostics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::errors::ProbeResult;

/// The six signals one probe run produces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub step_count: usize,
    pub output_blocks: usize,
    pub longest_output_len: usize,
    pub output_has_report_keywords: bool,
    pub card_interaction_ok: bool,
    pub end_signal_detected: bool,
}

impl RunResult {
    /// `RESULTS` followed by one `key=value` line per field.
    pub fn render(&self) -> String {
        let mut out = String::from("RESULTS\n");
        let lines: [(&str, String); 6] = [
            ("step_count", self.step_count.to_string()),
            ("output_blocks", self.output_blocks.to_string()),
            ("longest_output_len", self.longest_output_len.to_string()),
            (
                "output_has_report_keywords",
                render_bool(self.output_has_report_keywords).to_string(),
            ),
            (
                "card_interaction_ok",
                render_bool(self.card_interaction_ok).to_string(),
            ),
            (
                "end_signal_detected",
                render_bool(self.end_signal_detected).to_string(),
            ),
        ];
        for (key, value) in lines {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }
}

fn render_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Wall time one probe step took.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    pub step: String,
    pub elapsed_ms: u64,
}

impl StepTiming {
    pub fn new(step: &str, elapsed: Duration) -> Self {
        Self {
            step: step.to_string(),
            elapsed_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
        }
    }
}

/// A completed run with its context, written when a JSON report is requested.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub target: String,
    pub prompt: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub settled: bool,
    #[serde(default)]
    pub page_title: Option<String>,
    pub result: RunResult,
    #[serde(default)]
    pub steps: Vec<StepTiming>,
    pub screenshot: PathBuf,
    pub diagnostics: PageDiagnostics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_texts: Vec<String>,
}

impl RunReport {
    pub async fn write_json(&self, path: &Path) -> ProbeResult<()> {
        let body = serde_json::to_vec_pretty(self).map_err(std::io::Error::from)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, body).await?;
        info!(path = %path.display(), "wrote run report");
        Ok(())
    }
}
