//! Configuration management module
//!
//! Every value the probe uses lives in [`ProbeConfig`]. Sources, lowest
//! precedence first: built-in defaults, a YAML file, `WEBUI_PROBE_*`
//! environment variables, then command-line flags applied by the binary.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `WEBUI_PROBE_URL` | `target_url` |
//! | `WEBUI_PROBE_PROMPT` | `prompt` |
//! | `WEBUI_PROBE_SCREENSHOT` | `screenshot_path` |
//! | `WEBUI_PROBE_JSON_REPORT` | `json_report` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use cdp_adapter::{CdpConfig, Locator};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use url::Url;

use crate::errors::{ProbeError, ProbeResult};
use crate::scoring::DEFAULT_REPORT_KEYWORDS;

pub const DEFAULT_TARGET_URL: &str = "http://localhost:3002/?token=test-token";
pub const DEFAULT_PROMPT: &str = "分析黄金行情，给出完整报告";
pub const DEFAULT_SCREENSHOT_PATH: &str = "/tmp/webui_report_test.png";

/// Query parameters masked before a URL is logged or written to a report.
const SECRET_QUERY_KEYS: &[&str] = &["token", "access_token", "auth", "password"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub target_url: String,
    pub prompt: String,
    pub screenshot_path: PathBuf,
    pub full_page_screenshot: bool,
    pub json_report: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub selectors: Selectors,
    pub markers: Markers,
    pub report_keywords: Vec<String>,
    pub browser: CdpConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            screenshot_path: PathBuf::from(DEFAULT_SCREENSHOT_PATH),
            full_page_screenshot: true,
            json_report: None,
            timeouts: Timeouts::default(),
            selectors: Selectors::default(),
            markers: Markers::default(),
            report_keywords: DEFAULT_REPORT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            browser: CdpConfig::default(),
        }
    }
}

/// Bounds for every wait the probe performs, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub navigation_ms: u64,
    pub input_ms: u64,
    pub action_ms: u64,
    pub steps_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_deadline_ms: u64,
    pub text_read_ms: u64,
    pub settle_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            input_ms: 15_000,
            action_ms: 30_000,
            steps_ms: 20_000,
            poll_interval_ms: 1_000,
            poll_deadline_ms: 120_000,
            text_read_ms: 2_000,
            settle_ms: 500,
        }
    }
}

impl Timeouts {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn input(&self) -> Duration {
        Duration::from_millis(self.input_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn steps(&self) -> Duration {
        Duration::from_millis(self.steps_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_deadline(&self) -> Duration {
        Duration::from_millis(self.poll_deadline_ms)
    }

    pub fn text_read(&self) -> Duration {
        Duration::from_millis(self.text_read_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Where the probe looks for things on the page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub prompt_input: Locator,
    pub submit: Locator,
    pub step_card: Locator,
    pub spinner: Locator,
    pub completed: Locator,
    pub output_label: Locator,
    /// How many ancestors above an output label the output body search starts.
    pub output_body_up: usize,
    pub output_body_css: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            prompt_input: Locator::placeholder("Direct MarketBot intelligence..."),
            submit: Locator::role_exact("button", "Run"),
            step_card: Locator::css(".trace-card"),
            spinner: Locator::css(".trace-dot svg.animate-spin"),
            completed: Locator::css(".trace-dot svg[data-lucide='check-circle-2']"),
            output_label: Locator::text("Output"),
            output_body_up: 2,
            output_body_css: "pre".to_string(),
        }
    }
}

impl Selectors {
    /// One entry per output label, positioned like the label list.
    pub fn output_body(&self) -> Locator {
        Locator::related(
            self.output_label.clone(),
            self.output_body_up,
            self.output_body_css.clone(),
        )
    }
}

/// Class fragments that show a step card reacted to a click.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    pub class_attribute: String,
    pub selected: String,
    pub dimmed: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            class_attribute: "class".to_string(),
            selected: "opacity-100".to_string(),
            dimmed: "opacity-40".to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn from_yaml_str(raw: &str) -> ProbeResult<Self> {
        serde_yaml::from_str(raw)
            .map_err(|err| ProbeError::Config(format!("failed to parse config: {err}")))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_value("WEBUI_PROBE_URL") {
            self.target_url = url;
        }
        if let Some(prompt) = env_value("WEBUI_PROBE_PROMPT") {
            self.prompt = prompt;
        }
        if let Some(path) = env_value("WEBUI_PROBE_SCREENSHOT") {
            self.screenshot_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("WEBUI_PROBE_JSON_REPORT") {
            self.json_report = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> ProbeResult<()> {
        let url = Url::parse(&self.target_url).map_err(|err| {
            ProbeError::Config(format!("target_url '{}' is not a URL: {err}", self.target_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProbeError::Config(format!(
                "target_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(ProbeError::Config("prompt must not be empty".to_string()));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(ProbeError::Config(
                "timeouts.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.screenshot_path.as_os_str().is_empty() {
            return Err(ProbeError::Config("screenshot_path must not be empty".to_string()));
        }
        Ok(())
    }

    /// The target URL with secret query values masked, for logs and reports.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.target_url)
    }
}

pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if SECRET_QUERY_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Default location of the config file: `<config_dir>/webui-probe/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push("webui-probe");
        path.push("config.yaml");
        path
    })
}

/// Load configuration from file (explicit or default location) plus environment.
///
/// An explicitly requested file must exist; a missing default file falls
/// back to built-in defaults.
pub async fn load_config(config_path: Option<&Path>) -> ProbeResult<ProbeConfig> {
    let mut config = match config_path {
        Some(path) => {
            let content = fs::read_to_string(path).await.map_err(|err| {
                ProbeError::Config(format!("failed to read {}: {err}", path.display()))
            })?;
            let config = ProbeConfig::from_yaml_str(&content)?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => match default_config_path() {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path).await?;
                let config = ProbeConfig::from_yaml_str(&content)?;
                info!("Loaded configuration from: {}", path.display());
                config
            }
            Some(path) => {
                warn!(
                    "Config file not found, using defaults: {}",
                    path.display()
                );
                ProbeConfig::default()
            }
            None => ProbeConfig::default(),
        },
    };

    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn defaults_match_the_fixed_probe_constants() {
        let config = ProbeConfig::default();
        assert_eq!(config.target_url, "http://localhost:3002/?token=test-token");
        assert_eq!(config.prompt, "分析黄金行情，给出完整报告");
        assert_eq!(config.screenshot_path, PathBuf::from("/tmp/webui_report_test.png"));
        assert_eq!(config.timeouts.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.timeouts.poll_deadline(), Duration::from_secs(120));
        assert_eq!(config.timeouts.steps(), Duration::from_secs(20));
        assert_eq!(config.timeouts.input(), Duration::from_secs(15));
        assert_eq!(config.timeouts.text_read(), Duration::from_secs(2));
        assert_eq!(config.timeouts.settle(), Duration::from_millis(500));
        assert_eq!(config.report_keywords.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let raw = r#"
target_url: "https://ui.example.test/?token=abc"
timeouts:
  poll_deadline_ms: 5000
selectors:
  step_card:
    kind: css
    selector: ".step"
markers:
  selected: "is-active"
"#;
        let config = ProbeConfig::from_yaml_str(raw).unwrap();
        assert_eq!(config.target_url, "https://ui.example.test/?token=abc");
        assert_eq!(config.timeouts.poll_deadline_ms, 5000);
        assert_eq!(config.timeouts.poll_interval_ms, 1000);
        assert_eq!(config.selectors.step_card, Locator::css(".step"));
        assert_eq!(config.selectors.spinner, Locator::css(".trace-dot svg.animate-spin"));
        assert_eq!(config.markers.selected, "is-active");
        assert_eq!(config.markers.dimmed, "opacity-40");
        assert_eq!(config.prompt, DEFAULT_PROMPT);
    }

    #[test]
    fn submit_control_matches_its_name_exactly() {
        let selectors = Selectors::default();
        assert_eq!(selectors.submit, Locator::role_exact("button", "Run"));
        assert_ne!(selectors.submit, Locator::role("button", "Run"));
    }

    #[test]
    fn output_body_is_relative_to_output_labels() {
        let selectors = Selectors::default();
        assert_eq!(
            selectors.output_body(),
            Locator::related(Locator::text("Output"), 2, "pre")
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = ProbeConfig::default();
        config.target_url = "ftp://example.com/file".to_string();
        assert!(matches!(config.validate(), Err(ProbeError::Config(_))));

        let mut config = ProbeConfig::default();
        config.target_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = ProbeConfig::default();
        config.prompt = "   ".to_string();
        assert!(config.validate().is_err());

        let mut config = ProbeConfig::default();
        config.timeouts.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn redaction_masks_tokens_only() {
        assert_eq!(
            redact_url("http://localhost:3002/?token=test-token&tab=desk"),
            "http://localhost:3002/?token=***&tab=desk"
        );
        assert_eq!(redact_url("http://localhost:3002/"), "http://localhost:3002/");
        assert_eq!(redact_url("garbage"), "garbage");
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_file_values() {
        env::set_var("WEBUI_PROBE_URL", "http://127.0.0.1:9999/?token=x");
        env::set_var("WEBUI_PROBE_PROMPT", "  ");
        let mut config = ProbeConfig::default();
        config.apply_env_overrides();
        env::remove_var("WEBUI_PROBE_URL");
        env::remove_var("WEBUI_PROBE_PROMPT");

        assert_eq!(config.target_url, "http://127.0.0.1:9999/?token=x");
        assert_eq!(config.prompt, DEFAULT_PROMPT);
    }

    #[tokio::test]
    #[serial]
    async fn explicit_config_file_is_loaded_and_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.yaml");
        std::fs::write(&path, "prompt: \"summarize silver\"\n").unwrap();

        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config.prompt, "summarize silver");

        let missing = dir.path().join("absent.yaml");
        let err = load_config(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
}
