use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webui_probe::{load_config, run_probe, ProbeConfig};

/// webui-probe - headless smoke probe for the MarketBot web UI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Page to probe (overrides config and WEBUI_PROBE_URL)
    #[arg(long)]
    url: Option<String>,

    /// Prompt to submit
    #[arg(long)]
    prompt: Option<String>,

    /// Where to write the PNG screenshot
    #[arg(long, value_name = "FILE")]
    screenshot: Option<PathBuf>,

    /// Also write a JSON run report
    #[arg(long, value_name = "FILE")]
    json_report: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut ProbeConfig) {
        if let Some(url) = &self.url {
            config.target_url = url.clone();
        }
        if let Some(prompt) = &self.prompt {
            config.prompt = prompt.clone();
        }
        if let Some(path) = &self.screenshot {
            config.screenshot_path = path.clone();
        }
        if let Some(path) = &self.json_report {
            config.json_report = Some(path.clone());
        }
        if self.headful {
            config.browser.headless = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_logging(&cli.log_level, cli.debug)?;

    info!(
        "Starting webui-probe v{} ({} built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_DATE")
    );

    match run(&cli).await {
        Ok(()) => {
            info!("Probe completed");
            Ok(())
        }
        Err(e) => {
            error!("Probe failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let mut stdout = std::io::stdout();
    run_probe(&config, &mut stdout).await?;
    Ok(())
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    // stdout carries the RESULTS block only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_loaded_configuration() {
        let cli = Cli::parse_from([
            "webui-probe",
            "--url",
            "http://127.0.0.1:4000/?token=t",
            "--screenshot",
            "/tmp/other.png",
            "--headful",
        ]);
        let mut config = ProbeConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.target_url, "http://127.0.0.1:4000/?token=t");
        assert_eq!(config.screenshot_path, PathBuf::from("/tmp/other.png"));
        assert!(!config.browser.headless);
        assert_eq!(config.prompt, webui_probe::config::DEFAULT_PROMPT);
    }

    #[test]
    fn no_flags_keep_defaults() {
        let cli = Cli::parse_from(["webui-probe"]);
        let mut config = ProbeConfig::default();
        let before = config.target_url.clone();
        cli.apply_overrides(&mut config);
        assert_eq!(config.target_url, before);
        assert!(config.json_report.is_none());
    }
}
