use chrono::{SecondsFormat, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{JobConfig, JobId, Step, Viewport};

use crate::driver::{AutomationDriver, AutomationSession, DriverError, SessionOptions};

/// Default bound for `wait` steps without an explicit timeout.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

/// Page-load bound for the initial navigation.
const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Short yield after a fill so JS-driven field validation can settle.
const FILL_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Candidate pool for user-agent masking.
const MASK_USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Candidate pool for viewport masking.
const MASK_VIEWPORTS: [(u32, u32); 5] = [
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 720),
];

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("missing selector for {0}")]
    MissingSelector(&'static str),
    #[error("element not found: {selector} (waited {waited_ms} ms)")]
    ElementNotFound { selector: String, waited_ms: u64 },
    #[error("unsupported action")]
    UnsupportedAction,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Outcome of one agent execution, and of the aggregated run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub ok: bool,
    pub logs: String,
    pub error: Option<String>,
    pub screenshot: Option<String>,
}

/// One agent's view of a job: the immutable definition plus the derived
/// run identity used for artifact naming.
pub struct AgentJob<'a> {
    pub job_id: &'a JobId,
    pub url: &'a str,
    pub steps: &'a [Step],
    pub config: Option<&'a JobConfig>,
    pub run_id: String,
}

/// Replays an ordered step sequence against one driver session for one
/// simulated agent. Steps run strictly in sequence order; the first
/// failure ends the agent after a best-effort screenshot.
pub struct StepExecutor {
    driver: Arc<dyn AutomationDriver>,
    results_dir: PathBuf,
}

impl StepExecutor {
    pub fn new(driver: Arc<dyn AutomationDriver>, results_dir: PathBuf) -> Self {
        Self { driver, results_dir }
    }

    pub async fn run_agent<R: Rng + Send>(&self, job: &AgentJob<'_>, rng: &mut R) -> RunReport {
        let mut logs: Vec<String> = Vec::new();
        let options = session_options(job.config, rng);

        let mut session = match self.driver.open_session(&options).await {
            Ok(session) => session,
            Err(e) => {
                push_log(&mut logs, format!("session setup failed: {e}"));
                return RunReport {
                    ok: false,
                    logs: logs.join("\n"),
                    error: Some(e.to_string()),
                    screenshot: None,
                };
            }
        };

        let outcome = self.replay(session.as_mut(), job, &options, &mut logs).await;
        let report = match outcome {
            Ok(()) => RunReport {
                ok: true,
                logs: logs.join("\n"),
                error: None,
                screenshot: None,
            },
            Err(e) => {
                // Best-effort failure capture; its own error is ignored.
                let screenshot = self.save_screenshot(session.as_mut(), job).await.ok();
                RunReport {
                    ok: false,
                    logs: logs.join("\n"),
                    error: Some(e.to_string()),
                    screenshot,
                }
            }
        };
        session.close().await;
        report
    }

    async fn replay(
        &self,
        session: &mut dyn AutomationSession,
        job: &AgentJob<'_>,
        options: &SessionOptions,
        logs: &mut Vec<String>,
    ) -> Result<(), StepError> {
        session.navigate(job.url, NAVIGATE_TIMEOUT).await?;
        push_log(logs, format!("Navigated to {}", job.url));

        if let Some(server) = options.proxy.as_ref().and_then(|p| p.server.as_deref()) {
            push_log(logs, format!("Using proxy: {server}"));
        }
        if let Some(ua) = options.device.user_agent.as_deref() {
            push_log(logs, format!("Using user agent: {ua}"));
        }
        if job.config.is_some_and(|c| c.fingerprint_masking) {
            push_log(logs, "Fingerprint masking enabled".to_string());
        }

        let total = job.steps.len();
        for (idx, step) in job.steps.iter().enumerate() {
            let label = format!("{}/{} {}", idx + 1, total, step.action_name());

            match step {
                Step::Fill { selector, value } => {
                    let selector = selector
                        .as_deref()
                        .ok_or(StepError::MissingSelector("fill"))?;
                    session.fill(selector, value.as_deref().unwrap_or("")).await?;
                    // Let the page settle before the next step.
                    tokio::time::sleep(FILL_SETTLE_DELAY).await;
                    push_log(logs, format!("{label} {selector}"));
                }
                Step::Click { selector } => {
                    let selector = selector
                        .as_deref()
                        .ok_or(StepError::MissingSelector("click"))?;
                    let navigated = session.click(selector).await?;
                    if navigated {
                        push_log(logs, format!("{label} {selector} (navigated)"));
                    } else {
                        push_log(logs, format!("{label} {selector}"));
                    }
                }
                Step::Wait { selector, timeout_ms } => {
                    let selector = selector
                        .as_deref()
                        .ok_or(StepError::MissingSelector("wait"))?;
                    let waited_ms = timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);
                    let found = session
                        .wait_for(selector, Duration::from_millis(waited_ms))
                        .await?;
                    if !found {
                        return Err(StepError::ElementNotFound {
                            selector: selector.to_string(),
                            waited_ms,
                        });
                    }
                    push_log(logs, format!("{label} {selector}"));
                }
                Step::Screenshot => match self.save_screenshot(session, job).await {
                    Ok(file) => push_log(logs, format!("{label} saved {file}")),
                    // A screenshot step never fails the run.
                    Err(e) => push_log(logs, format!("{label} capture failed: {e}")),
                },
                Step::Pause => {
                    let visual = job.config.and_then(|c| c.visual_mode.as_ref());
                    match visual {
                        Some(v) if v.enabled && !options.headless && v.slow_mo_ms > 0 => {
                            push_log(logs, format!("{label} holding {} ms", v.slow_mo_ms));
                            tokio::time::sleep(Duration::from_millis(v.slow_mo_ms)).await;
                        }
                        _ => push_log(logs, label),
                    }
                }
                Step::Unknown => return Err(StepError::UnsupportedAction),
            }
        }

        Ok(())
    }

    /// Captures the page to `{job_id}-{run_id}-{unix_ms}.png` under the
    /// results directory and returns its `/results/` path.
    async fn save_screenshot(
        &self,
        session: &mut dyn AutomationSession,
        job: &AgentJob<'_>,
    ) -> Result<String, StepError> {
        let bytes = session.screenshot().await?;
        let file = format!(
            "{}-{}-{}.png",
            job.job_id,
            job.run_id,
            Utc::now().timestamp_millis()
        );
        std::fs::create_dir_all(&self.results_dir)
            .map_err(|e| DriverError::Screenshot(e.to_string()))?;
        std::fs::write(self.results_dir.join(&file), bytes)
            .map_err(|e| DriverError::Screenshot(e.to_string()))?;
        Ok(format!("/results/{file}"))
    }
}

/// Derives session identity from the job config. With fingerprint masking
/// on, user-agent, viewport and scale are drawn from fixed candidate pools.
pub fn session_options<R: Rng>(config: Option<&JobConfig>, rng: &mut R) -> SessionOptions {
    let mut device = config
        .and_then(|c| c.device.clone())
        .unwrap_or_default();

    if config.is_some_and(|c| c.fingerprint_masking) {
        device.user_agent = MASK_USER_AGENTS.choose(rng).map(|ua| ua.to_string());
        device.viewport = MASK_VIEWPORTS
            .choose(rng)
            .map(|&(width, height)| Viewport { width, height });
        device.device_scale_factor = Some(rng.gen_range(1.0..=3.0));
    }

    let visual = config.and_then(|c| c.visual_mode.as_ref());
    // Headful only when visual mode explicitly asks for a window.
    let headless = visual.map(|v| !v.enabled || v.headless).unwrap_or(true);

    SessionOptions {
        proxy: config.and_then(|c| c.proxy.clone()),
        device,
        headless,
    }
}

fn push_log(logs: &mut Vec<String>, line: String) {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    logs.push(format!("[{ts}] {line}"));
}
