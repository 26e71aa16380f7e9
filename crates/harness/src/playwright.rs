//! Playwright browser automation
//!
//! Each run compiles a list of [`UiStep`]s into a standalone Node script,
//! launches a fresh browser and context, and reports a single JSON line on
//! stdout. Every interpolated value goes through [`js_str`], so markup,
//! quotes and non-ASCII input reach the page byte for byte.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{FormTarget, Scenario};
use crate::steps::UiStep;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(HarnessError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    /// Frontend base URL
    pub base_url: String,
    pub screenshot_dir: PathBuf,
    /// Failure screenshots land here
    pub artifact_dir: PathBuf,
    /// Directory whose `node_modules` provides `playwright`
    pub node_project_dir: PathBuf,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    /// Per-action timeout inside the browser
    pub action_timeout_ms: u64,
    /// Upper bound for the network-idle wait
    pub settle_timeout_ms: u64,
    /// Upper bound for the result-dialog wait
    pub dialog_timeout_ms: u64,
    /// Hard limit on the whole node process
    pub process_timeout_secs: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            artifact_dir: PathBuf::from("test-results/artifacts"),
            node_project_dir: PathBuf::from("."),
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            action_timeout_ms: 5_000,
            settle_timeout_ms: 3_000,
            dialog_timeout_ms: 3_000,
            process_timeout_secs: 60,
        }
    }
}

/// What a script run saw
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiObservation {
    pub success: bool,
    /// `alert()` messages in the order they appeared
    #[serde(default)]
    pub dialogs: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub screenshots: Vec<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    /// True when the failure came from an in-page assertion
    #[serde(default)]
    pub assertion: bool,
    #[serde(default)]
    pub failure_screenshot: Option<PathBuf>,
    /// Label of the step that was running when the script failed
    #[serde(default)]
    pub step: Option<String>,
    /// Bounded waits that ran out without failing the run
    #[serde(default)]
    pub notes: Vec<String>,
}

impl UiObservation {
    /// The in-page failure a run ended with, if any.
    ///
    /// Everything reported here happened after the browser was up, so it
    /// is charged to the page rather than the environment.
    pub fn page_failure(&self, run_name: &str) -> Option<HarnessError> {
        if self.success {
            return None;
        }
        let error = self.error.clone().unwrap_or_else(|| "unknown failure".into());
        Some(if self.assertion {
            HarnessError::AssertionFailed {
                case: run_name.to_string(),
                expected: "page assertion to hold".into(),
                observed: error,
            }
        } else {
            HarnessError::PageStep {
                run: run_name.to_string(),
                step: self.step.clone().unwrap_or_else(|| "unknown".into()),
                error,
            }
        })
    }
}

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: PlaywrightConfig,
}

impl PlaywrightHandle {
    pub fn new(config: PlaywrightConfig) -> HarnessResult<Self> {
        std::fs::create_dir_all(&config.screenshot_dir)?;
        std::fs::create_dir_all(&config.artifact_dir)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    pub fn screenshot_path(&self, name: &str) -> PathBuf {
        self.config.screenshot_dir.join(format!("{}.png", name))
    }

    /// Fail fast when node or the playwright package is missing.
    pub async fn ensure_available(&self) -> HarnessResult<()> {
        let mut cmd = Command::new("node");
        cmd.args([
            "-e",
            "require.resolve('playwright', { paths: [process.cwd()] })",
        ])
        .current_dir(&self.config.node_project_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

        let status = match tokio::time::timeout(Duration::from_secs(15), cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                debug!("node not runnable: {}", e);
                return Err(HarnessError::PlaywrightNotFound);
            }
            Err(_) => return Err(HarnessError::Timeout("node startup".into())),
        };

        if status.success() {
            Ok(())
        } else {
            Err(HarnessError::PlaywrightNotFound)
        }
    }

    /// Build the script for a named run.
    pub fn build_script(&self, run_name: &str, steps: &[UiStep]) -> String {
        let cfg = &self.config;
        let failure_path = cfg.artifact_dir.join(format!("{}-failure.png", run_name));

        let mut script = format!(
            r#"
const {{ chromium, firefox, webkit }} = require(require.resolve('playwright', {{ paths: [process.cwd()] }}));

class UiAssertion extends Error {{}}

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  page.setDefaultTimeout({action_timeout});
  const baseUrl = {base_url};
  const dialogs = [];
  const screenshots = [];
  const notes = [];
  let currentStep = 'start';
  let dialogsSeen = 0;
  let dialogWaiters = [];

  page.on('dialog', async (dialog) => {{
    dialogs.push(dialog.message());
    const waiters = dialogWaiters;
    dialogWaiters = [];
    waiters.forEach((wake) => wake());
    await dialog.dismiss().catch(() => {{}});
  }});

  const awaitDialog = (timeout) => {{
    if (dialogs.length > dialogsSeen) return Promise.resolve();
    return new Promise((resolve) => {{
      const timer = setTimeout(resolve, timeout);
      dialogWaiters.push(() => {{ clearTimeout(timer); resolve(); }});
    }});
  }};

  try {{
"#,
            browser = cfg.browser.as_str(),
            headless = cfg.headless,
            width = cfg.viewport_width,
            height = cfg.viewport_height,
            action_timeout = cfg.action_timeout_ms,
            base_url = js_str(cfg.base_url.trim_end_matches('/')),
        );

        for (i, step) in steps.iter().enumerate() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, step.label().replace('\n', " ")));
            script.push_str(&format!("    currentStep = {};\n", js_str(&step.label())));
            script.push_str(&self.step_to_js(step));
            script.push('\n');
        }

        script.push_str(&format!(
            r#"
    console.log(JSON.stringify({{ success: true, dialogs, screenshots, notes, url: page.url(), title: await page.title() }}));
  }} catch (error) {{
    const failureScreenshot = {failure_path};
    const saved = await page.screenshot({{ path: failureScreenshot, fullPage: true }}).then(() => true, () => false);
    console.log(JSON.stringify({{
      success: false,
      dialogs,
      screenshots,
      notes,
      url: page.url(),
      step: currentStep,
      error: error.message,
      assertion: error instanceof UiAssertion,
      failure_screenshot: saved ? failureScreenshot : null
    }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            failure_path = js_str(&failure_path.to_string_lossy()),
        ));

        script
    }

    fn step_to_js(&self, step: &UiStep) -> String {
        let cfg = &self.config;
        match step {
            UiStep::Navigate { url } => {
                format!("    await page.goto(baseUrl + {});", js_str(url))
            }
            UiStep::WaitFor { selector, timeout_ms } => format!(
                "    await page.waitForSelector({}, {{ state: 'visible', timeout: {} }});",
                js_str(selector),
                timeout_ms.unwrap_or(cfg.action_timeout_ms)
            ),
            UiStep::Fill { selector, value } => {
                format!("    await page.fill({}, {});", js_str(selector), js_str(value))
            }
            UiStep::Click { selector } => format!("    await page.click({});", js_str(selector)),
            UiStep::WaitForNetworkIdle { timeout_ms } => {
                let timeout = timeout_ms.unwrap_or(cfg.settle_timeout_ms);
                format!(
                    "    await page.waitForLoadState('networkidle', {{ timeout: {t} }}).catch(() => {{\n      notes.push(`network idle not reached within {t}ms at ${{currentStep}}`);\n    }});",
                    t = timeout
                )
            }
            UiStep::AwaitDialog { timeout_ms } => format!(
                "    await awaitDialog({});\n    dialogsSeen = dialogs.length;",
                timeout_ms.unwrap_or(cfg.dialog_timeout_ms)
            ),
            UiStep::AssertTitle { pattern } => format!(
                r#"    {{
      const title = await page.title();
      if (!new RegExp({pattern}, 'i').test(title)) {{
        throw new UiAssertion(`title ${{JSON.stringify(title)}} does not match /${{{pattern}}}/i`);
      }}
    }}"#,
                pattern = js_str(pattern)
            ),
            UiStep::AssertVisible { selector } => format!(
                r#"    if (!(await page.locator({sel}).isVisible())) {{
      throw new UiAssertion(`${{{sel}}} is not visible`);
    }}"#,
                sel = js_str(selector)
            ),
            UiStep::Screenshot { name, selector, full_page } => {
                let path = js_str(&self.screenshot_path(name).to_string_lossy());
                let shot = match selector {
                    Some(sel) => format!(
                        "    await page.locator({}).screenshot({{ path: {} }});",
                        js_str(sel),
                        path
                    ),
                    None => format!(
                        "    await page.screenshot({{ path: {}, fullPage: {} }});",
                        path, full_page
                    ),
                };
                format!("{}\n    screenshots.push({});", shot, path)
            }
        }
    }

    /// Execute a script with node, bounded by the process timeout.
    pub async fn run_script(&self, script: &str) -> HarnessResult<UiObservation> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("run.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let child = Command::new("node")
            .arg(&script_path)
            .current_dir(&self.config.node_project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => HarnessError::PlaywrightNotFound,
                _ => HarnessError::Io(e),
            })?;

        let limit = Duration::from_secs(self.config.process_timeout_secs);
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| HarnessError::Timeout(format!("browser run exceeded {:?}", limit)))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        match parse_observation(&stdout) {
            Some(obs) => Ok(obs),
            None => Err(HarnessError::Playwright(format!(
                "script produced no result (exit {}):\nstdout: {}\nstderr: {}",
                output.status, stdout, stderr
            ))),
        }
    }

    /// Build and run `steps`, returning what the page did even when a step
    /// failed. Only launch and process failures are errors here.
    pub async fn observe(&self, run_name: &str, steps: &[UiStep]) -> HarnessResult<UiObservation> {
        let script = self.build_script(run_name, steps);
        let obs = self.run_script(&script).await?;
        for note in &obs.notes {
            warn!("{}: {}", run_name, note);
        }
        if let Some(path) = &obs.failure_screenshot {
            warn!("{} failed, screenshot saved to {}", run_name, path.display());
        }
        Ok(obs)
    }

    /// Build and run `steps`, turning an in-page failure into an error.
    pub async fn run(&self, run_name: &str, steps: &[UiStep]) -> HarnessResult<UiObservation> {
        let obs = self.observe(run_name, steps).await?;
        match obs.page_failure(run_name) {
            Some(e) => Err(e),
            None => Ok(obs),
        }
    }

    /// Drive one scenario row through its form. A failed step is reported
    /// on the observation.
    pub async fn submit_scenario(&self, form: FormTarget, scenario: &Scenario) -> HarnessResult<UiObservation> {
        let run_name = format!("{:?}-{}", form, scenario.slug()).to_lowercase();
        let obs = self.observe(&run_name, &UiStep::submit_form(form, scenario)).await?;
        debug!("{}: dialogs {:?}", run_name, obs.dialogs);
        Ok(obs)
    }

    /// Load `form`'s page until stable and capture it under `name`.
    pub async fn capture_page(
        &self,
        form: FormTarget,
        title_pattern: &str,
        name: &str,
        selector: Option<&str>,
    ) -> HarnessResult<PathBuf> {
        let mut steps = UiStep::stable_page(form, title_pattern);
        steps.push(UiStep::Screenshot {
            name: name.to_string(),
            selector: selector.map(String::from),
            full_page: selector.is_none(),
        });

        self.run(&format!("capture-{}", name), &steps).await?;
        let path = self.screenshot_path(name);
        if !path.exists() {
            return Err(HarnessError::Playwright(format!(
                "screenshot {} was not written",
                path.display()
            )));
        }
        info!("Captured {}", path.display());
        Ok(path)
    }
}

/// Judge a scenario's observed dialogs against its expected outcome.
pub fn check_dialog(form: FormTarget, scenario: &Scenario, obs: &UiObservation) -> HarnessResult<()> {
    let Some(expected) = form.expected_dialog(scenario.expected) else {
        return Ok(());
    };
    match obs.dialogs.first() {
        Some(msg) if msg == expected => Ok(()),
        observed => Err(HarnessError::AssertionFailed {
            case: scenario.description.clone(),
            expected: format!("dialog {:?}", expected),
            observed: observed
                .map(|m| format!("dialog {:?}", m))
                .unwrap_or_else(|| "no dialog".into()),
        }),
    }
}

/// JSON-encode a string so it is also a valid JavaScript string literal.
pub fn js_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn parse_observation(stdout: &str) -> Option<UiObservation> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}
