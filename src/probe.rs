//! The UI completion probe.
//!
//! One run navigates to the MarketBot UI, submits a prompt, waits for the
//! trace cards to stop spinning and then scores what the page rendered.
//! Navigation, submission and the first trace card are hard requirements;
//! everything after that degrades to defaults with a warning.

use std::path::PathBuf;

use cdp_adapter::{Locator, PageDriver};
use tokio::fs;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::errors::{ProbeError, ProbeResult};
use crate::poll::await_condition;
use crate::report::{RunResult, StepTiming};
use crate::scoring::{contains_keywords, interaction_responsive, longest_len};

/// What a completed probe run observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub result: RunResult,
    /// Whether the spinners stopped before the poll deadline.
    pub settled: bool,
    /// Text of every output block, `""` where the read failed.
    pub output_texts: Vec<String>,
    /// Document title once navigation finished, if it could be read.
    pub page_title: Option<String>,
    /// Time spent in each step, in run order.
    pub steps: Vec<StepTiming>,
}

/// Collects step timings as a run advances.
struct StepClock {
    mark: Instant,
    steps: Vec<StepTiming>,
}

impl StepClock {
    fn start() -> Self {
        Self {
            mark: Instant::now(),
            steps: Vec::new(),
        }
    }

    fn lap(&mut self, step: &str) {
        let now = Instant::now();
        let timing = StepTiming::new(step, now - self.mark);
        debug!(step, elapsed_ms = timing.elapsed_ms, "step finished");
        self.steps.push(timing);
        self.mark = now;
    }
}

pub struct Probe<'a, D: PageDriver + ?Sized> {
    driver: &'a D,
    config: &'a ProbeConfig,
}

impl<'a, D: PageDriver + ?Sized> Probe<'a, D> {
    pub fn new(driver: &'a D, config: &'a ProbeConfig) -> Self {
        Self { driver, config }
    }

    pub async fn run(&self) -> ProbeResult<ProbeOutcome> {
        let mut clock = StepClock::start();
        self.navigate().await?;
        let page_title = self.page_title().await;
        clock.lap("navigate");
        self.submit().await?;
        clock.lap("submit");
        self.await_first_step().await?;
        clock.lap("await_first_step");

        let settled = self.poll_until_quiescent().await;
        clock.lap("poll");

        let step_count = self.count_or_zero(&self.config.selectors.step_card, "step cards").await;
        let output_texts = self.extract_outputs().await;
        let longest_output_len = longest_len(&output_texts);
        let output_has_report_keywords =
            contains_keywords(&output_texts, &self.config.report_keywords);
        clock.lap("extract");
        let card_interaction_ok = if step_count >= 2 {
            self.check_interaction().await
        } else {
            debug!(step_count, "skipping card interaction check");
            false
        };
        clock.lap("interaction");
        let end_signal_detected = self.check_end_signal().await;
        clock.lap("end_signal");

        let result = RunResult {
            step_count,
            output_blocks: output_texts.len(),
            longest_output_len,
            output_has_report_keywords,
            card_interaction_ok,
            end_signal_detected,
        };
        info!(?result, settled, "probe run finished");
        Ok(ProbeOutcome {
            result,
            settled,
            output_texts,
            page_title,
            steps: clock.steps,
        })
    }

    /// Load the target and wait for the network to go quiet.
    pub async fn navigate(&self) -> ProbeResult<()> {
        let target = self.config.redacted_url();
        info!(url = %target, "navigating");
        self.driver
            .navigate(&self.config.target_url, self.config.timeouts.navigation())
            .await
            .map_err(|source| ProbeError::NavigationTimeout {
                url: target,
                source,
            })
    }

    /// Title of the loaded page. A failed read is logged and skipped.
    pub async fn page_title(&self) -> Option<String> {
        match self.driver.title().await {
            Ok(title) => {
                info!(title = title.as_deref().unwrap_or(""), "page title");
                title
            }
            Err(err) => {
                warn!(%err, "could not read page title");
                None
            }
        }
    }

    /// Type the prompt into the input and press the submit control.
    pub async fn submit(&self) -> ProbeResult<()> {
        let selectors = &self.config.selectors;
        self.driver
            .fill(
                &selectors.prompt_input,
                &self.config.prompt,
                self.config.timeouts.input(),
            )
            .await
            .map_err(|source| ProbeError::ElementNotFound {
                what: format!("prompt input ({})", selectors.prompt_input.describe()),
                source,
            })?;
        self.driver
            .click(&selectors.submit, 0, self.config.timeouts.action())
            .await
            .map_err(|source| ProbeError::ElementNotFound {
                what: format!("submit control ({})", selectors.submit.describe()),
                source,
            })?;
        info!(prompt = %self.config.prompt, "prompt submitted");
        Ok(())
    }

    /// Block until the first step card renders.
    pub async fn await_first_step(&self) -> ProbeResult<()> {
        let bound = self.config.timeouts.steps();
        self.driver
            .wait_for(&self.config.selectors.step_card, bound)
            .await
            .map_err(|source| ProbeError::StepsNotAppeared {
                waited_ms: bound.as_millis() as u64,
                source,
            })?;
        debug!("first step card rendered");
        Ok(())
    }

    /// Wait for every spinner to disappear. Returns whether that happened
    /// before the poll deadline.
    pub async fn poll_until_quiescent(&self) -> bool {
        let driver = self.driver;
        let spinner = &self.config.selectors.spinner;
        let timeouts = &self.config.timeouts;
        let settled = await_condition(
            move || async move {
                match driver.count(spinner).await {
                    Ok(0) => true,
                    Ok(spinning) => {
                        debug!(spinning, "steps still running");
                        false
                    }
                    Err(err) => {
                        warn!(%err, "spinner query failed");
                        false
                    }
                }
            },
            timeouts.poll_interval(),
            timeouts.poll_deadline(),
        )
        .await;
        if settled {
            info!("all steps settled");
        } else {
            warn!(
                deadline_ms = timeouts.poll_deadline_ms,
                "steps still spinning at poll deadline"
            );
        }
        settled
    }

    /// Text of each output block, one entry per block in page order.
    pub async fn extract_outputs(&self) -> Vec<String> {
        let selectors = &self.config.selectors;
        let blocks = self.count_or_zero(&selectors.output_label, "output blocks").await;
        let body = selectors.output_body();
        let bound = self.config.timeouts.text_read();

        let mut texts = Vec::with_capacity(blocks);
        for index in 0..blocks {
            let text = match timeout(bound, self.driver.inner_text(&body, index, bound)).await {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => {
                    warn!(index, %err, "output block unreadable");
                    String::new()
                }
                Err(_) => {
                    warn!(index, bound_ms = bound.as_millis() as u64, "output block read timed out");
                    String::new()
                }
            };
            texts.push(text);
        }
        debug!(blocks, "extracted output blocks");
        texts
    }

    /// Click the second card and check that the cards re-styled.
    pub async fn check_interaction(&self) -> bool {
        let cards = &self.config.selectors.step_card;
        let markers = &self.config.markers;
        if let Err(err) = self
            .driver
            .click(cards, 1, self.config.timeouts.action())
            .await
        {
            warn!(%err, "could not click second step card");
            return false;
        }
        sleep(self.config.timeouts.settle()).await;

        let first = self.class_of(cards, 0).await;
        let second = self.class_of(cards, 1).await;
        let responsive = interaction_responsive(
            first.as_deref(),
            second.as_deref(),
            &markers.selected,
            &markers.dimmed,
        );
        debug!(?first, ?second, responsive, "card interaction checked");
        responsive
    }

    /// No spinner left and at least one completed marker rendered.
    pub async fn check_end_signal(&self) -> bool {
        let selectors = &self.config.selectors;
        let spinning = match self.driver.count(&selectors.spinner).await {
            Ok(count) => count,
            Err(err) => {
                warn!(%err, "spinner query failed");
                return false;
            }
        };
        let completed = match self.driver.count(&selectors.completed).await {
            Ok(count) => count,
            Err(err) => {
                warn!(%err, "completed marker query failed");
                return false;
            }
        };
        debug!(spinning, completed, "end signal checked");
        spinning == 0 && completed > 0
    }

    /// Write the page as PNG to the configured path.
    pub async fn capture_screenshot(&self) -> ProbeResult<PathBuf> {
        let path = self.config.screenshot_path.clone();
        let bytes = self
            .driver
            .screenshot(self.config.full_page_screenshot)
            .await
            .map_err(|err| ProbeError::Screenshot(err.to_string()))?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "screenshot saved");
        Ok(path)
    }

    async fn count_or_zero(&self, locator: &Locator, what: &str) -> usize {
        match self.driver.count(locator).await {
            Ok(count) => count,
            Err(err) => {
                warn!(%err, "counting {what} failed");
                0
            }
        }
    }

    async fn class_of(&self, locator: &Locator, index: usize) -> Option<String> {
        let name = &self.config.markers.class_attribute;
        match self.driver.attribute(locator, index, name).await {
            Ok(value) => value,
            Err(err) => {
                warn!(index, %err, "could not read card {name}");
                None
            }
        }
    }
}
