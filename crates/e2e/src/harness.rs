//! Harness that owns the live server and browser session and runs scenario files

use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

use crate::admin::AdminSite;
use crate::browser::{Browser, WebDriverBrowser, WebDriverConfig};
use crate::error::{E2eError, E2eResult};
use crate::runner::{RunnerOptions, ScenarioResult, ScenarioRunner, StepResult, SuiteResult};
use crate::server::{ServerConfig, ServerHandle};
use crate::spec::ScenarioSpec;
use crate::store::{BackingStore, ManagePy};

/// Configuration for the harness
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server: ServerConfig,

    /// Use an already running site instead of spawning one
    pub base_url: Option<String>,

    pub webdriver: WebDriverConfig,
    pub runner: RunnerOptions,
    pub scenarios_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            base_url: None,
            webdriver: WebDriverConfig::default(),
            runner: RunnerOptions::default(),
            scenarios_dir: PathBuf::from("scenarios"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Main E2E harness
pub struct Harness {
    config: HarnessConfig,

    /// Running server handle (if we spawned one)
    server: Option<ServerHandle>,

    browser: Option<WebDriverBrowser>,

    site: Option<AdminSite>,
}

impl Harness {
    pub fn with_config(config: HarnessConfig) -> Self {
        Self {
            config,
            server: None,
            browser: None,
            site: None,
        }
    }

    /// Bring up the site (unless one was given) and open the browser
    pub async fn start(&mut self) -> E2eResult<()> {
        if self.site.is_none() {
            let base_url = match &self.config.base_url {
                Some(url) => url.clone(),
                None => {
                    let server = ServerHandle::spawn(self.config.server.clone()).await?;
                    let url = server.base_url().to_string();
                    self.server = Some(server);
                    url
                }
            };
            self.site = Some(AdminSite::new(base_url));
        }

        if self.browser.is_none() {
            self.browser = Some(WebDriverBrowser::connect(&self.config.webdriver).await?);
        }
        Ok(())
    }

    /// Close the browser and stop the server
    pub async fn shutdown(&mut self) -> E2eResult<()> {
        if let Some(browser) = self.browser.take() {
            browser.quit().await?;
        }
        if let Some(mut server) = self.server.take() {
            server.shutdown().await?;
        }
        self.site = None;
        Ok(())
    }

    /// Run all scenarios in the scenarios directory
    pub async fn run_all(&mut self) -> E2eResult<SuiteResult> {
        let specs = ScenarioSpec::load_all(&self.config.scenarios_dir)?;
        self.run_specs(&specs).await
    }

    /// Run scenarios carrying a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<SuiteResult> {
        let specs = ScenarioSpec::load_all(&self.config.scenarios_dir)?;
        let filtered: Vec<ScenarioSpec> = ScenarioSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered).await
    }

    /// Run one scenario by name; `view-only-staff` falls back to the built-in
    /// scenario when no file declares it
    pub async fn run_named(&mut self, name: &str) -> E2eResult<SuiteResult> {
        let specs = if self.config.scenarios_dir.is_dir() {
            ScenarioSpec::load_all(&self.config.scenarios_dir)?
        } else {
            Vec::new()
        };

        let spec = match specs.into_iter().find(|s| s.name == name) {
            Some(spec) => spec,
            None if name == ScenarioSpec::view_only_staff().name => ScenarioSpec::view_only_staff(),
            None => return Err(E2eError::SpecParse(format!("Scenario not found: {}", name))),
        };
        self.run_specs(std::slice::from_ref(&spec)).await
    }

    /// Run a list of scenarios, each against a flushed database
    pub async fn run_specs(&mut self, specs: &[ScenarioSpec]) -> E2eResult<SuiteResult> {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        self.start().await?;

        let (browser, site) = match (&self.browser, &self.site) {
            (Some(browser), Some(site)) => (browser.clone(), site.clone()),
            _ => return Err(E2eError::Session("harness not started".into())),
        };
        let store = self.config.server.project.clone();

        info!("Running {} scenario(s)...", specs.len());

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = match run_one(browser.clone(), store.clone(), site.clone(), &self.config.runner, spec).await {
                Ok(result) => result,
                Err(e) => {
                    error!("✗ {} - {}", spec.name, e);
                    errored(spec, &e)
                }
            };
            results.push(result);
        }

        let suite = SuiteResult::from_results(started_at, start.elapsed(), results);
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, suite.duration_ms
        );
        Ok(suite)
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.config.output_dir, results)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(mut server) = self.server.take() {
            let _ = server.stop();
        }
    }
}

async fn run_one(
    browser: WebDriverBrowser,
    store: ManagePy,
    site: AdminSite,
    options: &RunnerOptions,
    spec: &ScenarioSpec,
) -> E2eResult<ScenarioResult> {
    store.reset().await?;
    let mut runner = ScenarioRunner::new(browser, store, site, options.clone());
    runner.run(spec).await
}

/// Result for a scenario that could not be started
fn errored(spec: &ScenarioSpec, e: &E2eError) -> ScenarioResult {
    ScenarioResult {
        name: spec.name.clone(),
        expect: spec.expect,
        success: false,
        passed: false,
        duration_ms: 0,
        steps: vec![StepResult {
            step_name: "setup".to_string(),
            success: false,
            duration_ms: 0,
            error: Some(e.to_string()),
        }],
        failed_step: Some("setup".to_string()),
        denials_confirmed: 0,
        error: Some(e.to_string()),
        screenshot_path: None,
    }
}

/// Write `results` as `test-results.json` under `output_dir`
pub fn write_results(output_dir: &std::path::Path, results: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
