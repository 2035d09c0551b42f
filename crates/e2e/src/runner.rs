//! Scenario runner: drives the admin UI through a [`Browser`] one step at a time

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::account::{Account, Permission};
use crate::admin::{self, AdminSite, DEFAULT_DENIAL_MARKERS};
use crate::browser::{Browser, Locator};
use crate::error::{E2eError, E2eResult};
use crate::session::{Session, SessionState};
use crate::spec::{Expectation, ScenarioSpec, ScenarioStep};
use crate::store::BackingStore;
use crate::wait::{self, WaitPolicy};

/// Result of executing a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub expect: Expectation,

    /// Every step completed
    pub success: bool,

    /// `success` agrees with `expect`
    pub passed: bool,

    pub duration_ms: u64,
    pub steps: Vec<StepResult>,

    /// Name of the step the scenario stopped at
    pub failed_step: Option<String>,

    /// Detail views that were refused as expected
    pub denials_confirmed: usize,

    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// Tunables for a [`ScenarioRunner`]
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub wait: WaitPolicy,

    /// Case-insensitive substrings that mark a page as a permission denial
    pub denial_markers: Vec<String>,

    /// Overwrite permissions through the backing store when the UI assigned
    /// a different set, instead of failing
    pub narrow_permissions: bool,

    /// Where to save a screenshot when a step fails
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::default(),
            denial_markers: DEFAULT_DENIAL_MARKERS.iter().map(|m| m.to_string()).collect(),
            narrow_permissions: true,
            screenshot_dir: None,
        }
    }
}

/// How the change form of a freshly added user was reached
enum ChangeForm {
    Open,
    Linked,
}

/// Executes scenario steps against one admin site with one browser session
pub struct ScenarioRunner<B, S> {
    browser: B,
    store: S,
    site: AdminSite,
    options: RunnerOptions,
    session: Session,
    superuser: Option<String>,
}

impl<B: Browser, S: BackingStore> ScenarioRunner<B, S> {
    pub fn new(browser: B, store: S, site: AdminSite, options: RunnerOptions) -> Self {
        Self {
            browser,
            store,
            site,
            options,
            session: Session::new(),
            superuser: None,
        }
    }

    pub fn session(&self) -> &SessionState {
        self.session.state()
    }

    /// Create the single superuser directly in the backing store
    pub async fn bootstrap_superuser(&mut self, username: &str, password: &str, email: &str) -> E2eResult<()> {
        if let Some(existing) = &self.superuser {
            return Err(E2eError::AlreadyBootstrapped(existing.clone()));
        }
        self.store.create_superuser(username, email, password).await?;
        self.superuser = Some(username.to_string());
        info!("Bootstrapped superuser {}", username);
        Ok(())
    }

    /// Submit the login form and wait for the authenticated header
    pub async fn login(&mut self, username: &str, password: &str) -> E2eResult<()> {
        if self.superuser.is_none() {
            return Err(E2eError::NotBootstrapped(username.to_string()));
        }
        self.session.begin_login(username)?;

        match self.submit_login(username, password).await {
            Ok(()) => {
                self.session.complete_login()?;
                info!("Logged in as {}", username);
                Ok(())
            }
            Err(e) => {
                self.session.fail_login()?;
                Err(e)
            }
        }
    }

    async fn submit_login(&self, username: &str, password: &str) -> E2eResult<()> {
        self.browser.goto(&self.site.login_url()).await?;
        self.wait_present(&admin::login_username(), "login form").await?;

        self.browser.send_keys(&admin::login_username(), username).await?;
        self.browser.send_keys(&admin::login_password(), password).await?;
        self.browser.click(&admin::login_submit()).await?;

        self.wait_present(&admin::user_tools(), &format!("admin header after logging in as {}", username))
            .await
    }

    /// Use whichever logout control the page offers and wait until the
    /// authenticated header is gone
    pub async fn logout(&mut self) -> E2eResult<()> {
        let username = self.session.require_authenticated("logout")?.to_string();

        self.browser.goto(&self.site.index_url()).await?;
        let controls = admin::logout_controls();
        let controls = &controls;
        let this = &*self;
        let control = wait::until(self.options.wait, "logout control", move || {
            this.first_clickable(controls)
        })
        .await;
        let control = self.with_page(control).await?;
        self.browser.click(&control).await?;

        let tools = admin::user_tools();
        let tools = &tools;
        let browser = &self.browser;
        let gone = wait::until(self.options.wait, "admin header to disappear", move || async move {
            browser.is_present(tools).await.map(|present| (!present).then_some(()))
        })
        .await;
        self.with_page(gone).await?;

        self.session.end()?;
        info!("Logged out {}", username);
        Ok(())
    }

    async fn first_clickable(&self, controls: &[Locator]) -> E2eResult<Option<Locator>> {
        for control in controls {
            if self.browser.is_clickable(control).await? {
                return Ok(Some(control.clone()));
            }
        }
        Ok(None)
    }

    /// Add a user through the admin form; if `is_staff` or any permission is
    /// requested, set them on the user's change form afterwards
    pub async fn create_restricted_user(
        &mut self,
        username: &str,
        password: &str,
        is_staff: bool,
        permissions: &[Permission],
    ) -> E2eResult<()> {
        let actor = self.session.require_authenticated("create user")?.to_string();
        debug!("{} is creating {}", actor, username);

        self.browser.goto(&self.site.users_url()).await?;
        self.wait_clickable(&admin::add_user_link(), "add user link").await?;
        self.browser.click(&admin::add_user_link()).await?;

        self.wait_present(&admin::username_field(), "add user form").await?;
        self.browser.send_keys(&admin::username_field(), username).await?;
        self.browser.send_keys(&admin::password_field(), password).await?;
        self.browser
            .send_keys(&admin::password_confirmation_field(), password)
            .await?;
        self.browser.click(&admin::save_button()).await?;
        self.wait_saved(&format!("add user {}", username)).await?;

        if is_staff || !permissions.is_empty() {
            self.open_change_form(username).await?;

            if is_staff && !self.browser.is_selected(&admin::staff_checkbox()).await? {
                self.browser.click(&admin::staff_checkbox()).await?;
            }
            for permission in permissions {
                self.choose_permission(permission).await?;
            }

            self.browser.click(&admin::save_button()).await?;
            self.wait_saved(&format!("change user {}", username)).await?;
        }

        info!(
            "Created {} (staff: {}, permissions: {:?})",
            username,
            is_staff,
            permissions.iter().map(Permission::natural_key).collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Django lands on the change form after adding a user; older setups
    /// return to the changelist, where the user has to be opened by name
    async fn open_change_form(&self, username: &str) -> E2eResult<()> {
        let checkbox = admin::staff_checkbox();
        let link = admin::user_link_text(username);

        let (this, checkbox_ref, link_ref) = (self, &checkbox, &link);
        let reached = wait::until(self.options.wait, "user change form", move || {
            this.change_form_state(checkbox_ref, link_ref)
        })
        .await;

        if let ChangeForm::Linked = self.with_page(reached).await? {
            self.browser.click(&link).await?;
            self.wait_present(&checkbox, &format!("change form of {}", username)).await?;
        }
        Ok(())
    }

    async fn change_form_state(&self, checkbox: &Locator, link: &Locator) -> E2eResult<Option<ChangeForm>> {
        if self.browser.is_present(checkbox).await? {
            Ok(Some(ChangeForm::Open))
        } else if self.browser.is_clickable(link).await? {
            Ok(Some(ChangeForm::Linked))
        } else {
            Ok(None)
        }
    }

    async fn choose_permission(&self, permission: &Permission) -> E2eResult<()> {
        let label = permission.ui_label();
        let filter = admin::permission_filter();

        self.browser.clear(&filter).await?;
        self.browser.send_keys(&filter, &label).await?;

        let option = admin::permission_option(&label);
        self.wait_present(&option, &format!("permission option '{}'", label)).await?;
        self.browser.click(&option).await?;
        self.browser.click(&admin::permission_add_link()).await?;
        debug!("Chose permission {}", permission);
        Ok(())
    }

    /// Compare the permissions stored for `username` with `expected`,
    /// narrowing them through the backing store when allowed
    pub async fn verify_permissions(&mut self, username: &str, expected: &BTreeSet<Permission>) -> E2eResult<()> {
        let actual = self.store.permissions(username).await?;
        if &actual == expected {
            debug!("{} holds exactly {:?}", username, keys(expected));
            return Ok(());
        }

        if !self.options.narrow_permissions {
            return Err(E2eError::AssertionFailed(format!(
                "{} holds {:?}, expected {:?}",
                username,
                keys(&actual),
                keys(expected)
            )));
        }

        warn!(
            "UI left {} with {:?}; narrowing to {:?} in the backing store",
            username,
            keys(&actual),
            keys(expected)
        );
        self.store.set_permissions(username, expected).await?;

        let narrowed = self.store.permissions(username).await?;
        if &narrowed != expected {
            return Err(E2eError::AssertionFailed(format!(
                "{} still holds {:?} after narrowing to {:?}",
                username,
                keys(&narrowed),
                keys(expected)
            )));
        }
        Ok(())
    }

    /// Every username has exactly one row in the users changelist
    pub async fn assert_listed(&mut self, usernames: &[String]) -> E2eResult<()> {
        self.session.require_authenticated("list users")?;
        self.browser.goto(&self.site.users_url()).await?;

        for username in usernames {
            let row = self.find_row(username).await?;
            let rows = self.browser.count(&row).await?;
            if rows != 1 {
                return Err(E2eError::AssertionFailed(format!(
                    "expected one listing row for {}, found {}",
                    username, rows
                )));
            }
        }
        info!("All {} account(s) listed", usernames.len());
        Ok(())
    }

    /// Open the detail view of `username` and require it to be refused: the
    /// page must not offer the save control, and its title must carry a
    /// denial marker or be Django's read-only "View user" page
    pub async fn assert_access_denied(&mut self, username: &str) -> E2eResult<()> {
        let actor = self.session.require_authenticated("open user detail")?.to_string();

        let listing = self.site.users_url();
        self.browser.goto(&listing).await?;
        self.find_row(username).await?;

        let link = admin::user_detail_link(username);
        if !self.browser.is_present(&link).await? {
            return Err(E2eError::ElementNotFound(format!("detail link for {}", username)));
        }
        self.browser.click(&link).await?;

        let (browser, listing) = (&self.browser, &listing);
        let left = wait::until(
            self.options.wait,
            &format!("detail page of {}", username),
            move || async move { browser.current_url().await.map(|url| (url != *listing).then_some(url)) },
        )
        .await;
        let url = self.with_page(left).await?;

        let editable = self.browser.is_present(&admin::save_button()).await?;
        let title = self.browser.title().await?;
        match admin::denial_reason(&title, editable, &self.options.denial_markers) {
            Some(reason) => {
                info!("{} was refused {} ({})", actor, username, reason);
                Ok(())
            }
            None => {
                let text = self.browser.page_text().await?;
                let outcome = if editable {
                    format!("{} can still edit {}", actor, username)
                } else {
                    format!("opening {} as {} showed no denial", username, actor)
                };
                Err(E2eError::AssertionFailed(format!(
                    "{} at {} (title '{}'). Page:\n{}",
                    outcome, url, title, text
                )))
            }
        }
    }

    /// Execute every step of `spec`, stopping at the first failure
    pub async fn run(&mut self, spec: &ScenarioSpec) -> E2eResult<ScenarioResult> {
        let steps = spec.steps()?;
        let start = Instant::now();
        info!("Running scenario {} ({} steps)", spec.name, steps.len());

        let mut results = Vec::with_capacity(steps.len());
        let mut failure: Option<(usize, E2eError)> = None;
        let mut denials_confirmed = 0;

        for (index, step) in steps.iter().enumerate() {
            let step_start = Instant::now();
            let outcome = self.execute_step(step).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    if let ScenarioStep::AssertDenied(_) = step {
                        denials_confirmed += 1;
                    }
                    results.push(StepResult {
                        step_name: step.name(),
                        success: true,
                        duration_ms,
                        error: None,
                    });
                }
                Err(e) => {
                    results.push(StepResult {
                        step_name: step.name(),
                        success: false,
                        duration_ms,
                        error: Some(e.to_string()),
                    });
                    failure = Some((index, e));
                    break;
                }
            }
        }

        let screenshot_path = match &failure {
            Some((index, _)) => self.capture_failure(&spec.name, *index).await,
            None => None,
        };

        let success = failure.is_none();
        let failed_step = failure.as_ref().map(|(index, _)| steps[*index].name());
        let passed = match (spec.expect, &failure) {
            (Expectation::Success, None) => true,
            (Expectation::Failure, Some((index, e))) => caught_by_denial_check(&steps[*index], e),
            _ => false,
        };
        let error = failure.map(|(_, e)| e.to_string());

        if passed {
            info!("✓ {} ({} denial(s) confirmed)", spec.name, denials_confirmed);
        } else if let (Some(step), Some(e)) = (&failed_step, &error) {
            error!("✗ {} - {} failed: {}", spec.name, step, e);
        } else {
            error!("✗ {} - expected the denial check to fail, but every step passed", spec.name);
        }

        Ok(ScenarioResult {
            name: spec.name.clone(),
            expect: spec.expect,
            success,
            passed,
            duration_ms: start.elapsed().as_millis() as u64,
            steps: results,
            failed_step,
            denials_confirmed,
            error,
            screenshot_path,
        })
    }

    async fn execute_step(&mut self, step: &ScenarioStep) -> E2eResult<()> {
        debug!("Executing step: {}", step.name());
        match step {
            ScenarioStep::Bootstrap(account) => {
                self.bootstrap_superuser(&account.username, &account.password, &account.email)
                    .await
            }
            ScenarioStep::Login { username, password } => self.login(username, password).await,
            ScenarioStep::CreateAccount(Account {
                username,
                password,
                staff,
                permissions,
                ..
            }) => {
                self.create_restricted_user(username, password, *staff, permissions)
                    .await
            }
            ScenarioStep::VerifyPermissions { username, permissions } => {
                self.verify_permissions(username, permissions).await
            }
            ScenarioStep::AssertListed(usernames) => self.assert_listed(usernames).await,
            ScenarioStep::AssertDenied(username) => self.assert_access_denied(username).await,
            ScenarioStep::Logout => self.logout().await,
        }
    }

    async fn capture_failure(&self, scenario: &str, step_index: usize) -> Option<PathBuf> {
        let dir = self.options.screenshot_dir.as_ref()?;
        let path = dir.join(format!("{}-step{:02}.png", scenario, step_index + 1));

        match self.save_screenshot(&path).await {
            Ok(()) => {
                info!("Failure screenshot: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not save failure screenshot: {}", e);
                None
            }
        }
    }

    async fn save_screenshot(&self, path: &std::path::Path) -> E2eResult<()> {
        let png = self.browser.screenshot().await?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, png)?;
        Ok(())
    }

    /// Wait for a row of `username` in the changelist; a missing row is an
    /// assertion failure, not a timeout
    async fn find_row(&self, username: &str) -> E2eResult<Locator> {
        let row = admin::user_row(username);
        match self.wait_present(&row, &format!("listing row for {}", username)).await {
            Ok(()) => Ok(row),
            Err(E2eError::Timeout { page, .. }) => Err(E2eError::AssertionFailed(format!(
                "user {} is not shown in the listing. Page:\n{}",
                username, page
            ))),
            Err(e) => Err(e),
        }
    }

    async fn wait_present(&self, locator: &Locator, what: &str) -> E2eResult<()> {
        let browser = &self.browser;
        let result = wait::until(self.options.wait, what, move || async move {
            browser.is_present(locator).await.map(|present| present.then_some(()))
        })
        .await;
        self.with_page(result).await
    }

    async fn wait_clickable(&self, locator: &Locator, what: &str) -> E2eResult<()> {
        let browser = &self.browser;
        let result = wait::until(self.options.wait, what, move || async move {
            browser.is_clickable(locator).await.map(|ready| ready.then_some(()))
        })
        .await;
        self.with_page(result).await
    }

    /// Wait for Django's success message after a form submission
    async fn wait_saved(&self, form: &str) -> E2eResult<()> {
        match self.wait_present(&admin::success_message(), form).await {
            Err(E2eError::Timeout { page, .. }) => Err(E2eError::FormSubmission {
                form: form.to_string(),
                page,
            }),
            other => other,
        }
    }

    /// Attach the current page text to a timeout
    async fn with_page<T>(&self, result: E2eResult<T>) -> E2eResult<T> {
        match result {
            Err(E2eError::Timeout { what, waited, .. }) => {
                let page = self
                    .browser
                    .page_text()
                    .await
                    .unwrap_or_else(|e| format!("<page text unavailable: {}>", e));
                Err(E2eError::Timeout { what, waited, page })
            }
            other => other,
        }
    }
}

/// A negative scenario is only caught when a denial assertion itself fails;
/// breaking anywhere else says nothing about the permissions under test
fn caught_by_denial_check(step: &ScenarioStep, error: &E2eError) -> bool {
    matches!(step, ScenarioStep::AssertDenied(_)) && matches!(error, E2eError::AssertionFailed(_))
}

fn keys(permissions: &BTreeSet<Permission>) -> Vec<String> {
    permissions.iter().map(Permission::natural_key).collect()
}

/// Result of running a batch of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn from_results(started_at: chrono::DateTime<chrono::Utc>, elapsed: Duration, results: Vec<ScenarioResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms: elapsed.as_millis() as u64,
            results,
        }
    }
}
