//! In-memory stand-in for a Django admin site.
//!
//! Answers the same locators the runner uses, keeps users and permissions in
//! memory, and doubles as the backing store. Pages carry the text Django
//! renders: view-only staff get the read-only "View user" page, staff that may
//! change users get the change form with its "Permissions" fieldset.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use admin_e2e::admin::{self, AdminSite};
use admin_e2e::runner::{RunnerOptions, ScenarioRunner};
use admin_e2e::wait::WaitPolicy;
use admin_e2e::{BackingStore, Browser, E2eError, E2eResult, Locator, Permission};
use async_trait::async_trait;
use parking_lot::Mutex;

pub const BASE_URL: &str = "http://admin.test";

/// Deviations from stock Django behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct Quirks {
    /// Choosing "Can view user" in the form also stores "Can change user"
    pub view_grants_change: bool,
    /// Adding a user returns to the changelist instead of the change form
    pub add_returns_to_list: bool,
    /// Only the pre-4.1 logout link is rendered
    pub legacy_logout: bool,
    /// Saved forms never show a success message
    pub drop_messages: bool,
    /// View-only staff get a 403 instead of the read-only page
    pub detail_forbidden: bool,
    /// Listing rows carry no link to the user's page
    pub unlinked_rows: bool,
}

#[derive(Debug, Clone)]
pub struct FakeUser {
    pub password: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub perms: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Page {
    Blank,
    Login { rejected: bool },
    Index,
    Changelist,
    AddUser,
    ChangeUser(String),
    ViewUser(String),
    /// 403 served at the given path
    Forbidden(String),
    LoggedOut,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Body,
    LoginUsername,
    LoginPassword,
    LoginSubmit,
    UserTools,
    LogoutButton,
    LogoutLink,
    AddLink,
    Success,
    Row(String),
    DetailLink(String),
    NamedLink(String),
    UsernameField,
    PasswordField,
    ConfirmationField,
    Save,
    StaffCheckbox,
    PermissionFilter,
    PermissionOption(String),
    PermissionAddLink,
}

impl Target {
    fn locator(&self) -> Locator {
        match self {
            Target::Body => Locator::css("body"),
            Target::LoginUsername => admin::login_username(),
            Target::LoginPassword => admin::login_password(),
            Target::LoginSubmit => admin::login_submit(),
            Target::UserTools => admin::user_tools(),
            Target::LogoutButton => admin::logout_controls()[0].clone(),
            Target::LogoutLink => admin::logout_controls()[1].clone(),
            Target::AddLink => admin::add_user_link(),
            Target::Success => admin::success_message(),
            Target::Row(u) => admin::user_row(u),
            Target::DetailLink(u) => admin::user_detail_link(u),
            Target::NamedLink(u) => admin::user_link_text(u),
            Target::UsernameField => admin::username_field(),
            Target::PasswordField => admin::password_field(),
            Target::ConfirmationField => admin::password_confirmation_field(),
            Target::Save => admin::save_button(),
            Target::StaffCheckbox => admin::staff_checkbox(),
            Target::PermissionFilter => admin::permission_filter(),
            Target::PermissionOption(key) => admin::permission_option(&label_of(key)),
            Target::PermissionAddLink => admin::permission_add_link(),
        }
    }
}

fn label_of(key: &str) -> String {
    key.parse::<Permission>()
        .map(|p| p.ui_label())
        .unwrap_or_else(|_| key.to_string())
}

/// Every permission `django.contrib.auth` installs
fn catalog() -> Vec<String> {
    let mut keys = Vec::new();
    for model in ["group", "permission", "user"] {
        for action in ["add", "change", "delete", "view"] {
            keys.push(format!("auth.{}_{}", action, model));
        }
    }
    keys
}

struct State {
    users: BTreeMap<String, FakeUser>,
    session: Option<String>,
    page: Page,
    message: Option<String>,
    fields: HashMap<String, String>,
    staff_checked: bool,
    chosen: BTreeSet<String>,
    highlighted: Option<String>,
    filter: String,
    quirks: Quirks,
    store_calls: Vec<String>,
}

impl State {
    fn can(&self, action: &str) -> bool {
        let Some(actor) = self.session.as_ref().and_then(|u| self.users.get(u)) else {
            return false;
        };
        actor.is_superuser || actor.perms.contains(&format!("auth.{}_user", action))
    }

    fn on_admin_page(&self) -> bool {
        self.session.is_some()
            && matches!(
                self.page,
                Page::Index | Page::Changelist | Page::AddUser | Page::ChangeUser(_) | Page::ViewUser(_)
            )
    }

    fn visible(&self) -> Vec<Target> {
        let mut targets = vec![Target::Body];

        if self.on_admin_page() {
            targets.push(Target::UserTools);
            targets.push(if self.quirks.legacy_logout {
                Target::LogoutLink
            } else {
                Target::LogoutButton
            });
        }
        if self.message.is_some() {
            targets.push(Target::Success);
        }

        match &self.page {
            Page::Login { .. } => {
                targets.extend([Target::LoginUsername, Target::LoginPassword, Target::LoginSubmit]);
            }
            Page::Changelist => {
                if self.can("add") {
                    targets.push(Target::AddLink);
                }
                for name in self.users.keys() {
                    targets.push(Target::Row(name.clone()));
                    if !self.quirks.unlinked_rows {
                        targets.push(Target::DetailLink(name.clone()));
                        targets.push(Target::NamedLink(name.clone()));
                    }
                }
            }
            Page::AddUser => {
                targets.extend([
                    Target::UsernameField,
                    Target::PasswordField,
                    Target::ConfirmationField,
                    Target::Save,
                ]);
            }
            Page::ChangeUser(_) => {
                targets.extend([
                    Target::StaffCheckbox,
                    Target::PermissionFilter,
                    Target::PermissionAddLink,
                    Target::Save,
                ]);
                let filter = self.filter.to_lowercase();
                for key in catalog() {
                    if !self.chosen.contains(&key) && label_of(&key).to_lowercase().contains(&filter) {
                        targets.push(Target::PermissionOption(key));
                    }
                }
            }
            _ => {}
        }
        targets
    }

    fn resolve(&self, locator: &Locator) -> Option<Target> {
        self.visible().into_iter().find(|t| t.locator() == *locator)
    }

    fn require(&self, locator: &Locator) -> E2eResult<Target> {
        self.resolve(locator)
            .ok_or_else(|| E2eError::ElementNotFound(locator.to_string()))
    }

    fn show(&mut self, page: Page) {
        self.page = page;
        self.message = None;
        self.fields.clear();
        self.filter.clear();
        self.highlighted = None;
    }

    fn open_change_form(&mut self, username: &str) {
        let user = self.users.get(username).cloned();
        self.show(Page::ChangeUser(username.to_string()));
        if let Some(user) = user {
            self.staff_checked = user.is_staff;
            self.chosen = user.perms;
        }
    }

    fn field(&mut self, key: &str) -> String {
        self.fields.remove(key).unwrap_or_default()
    }

    fn click(&mut self, target: Target) {
        match target {
            Target::LoginSubmit => {
                let username = self.field("login_username");
                let password = self.field("login_password");
                let accepted = self
                    .users
                    .get(&username)
                    .map(|u| u.password == password && u.is_staff)
                    .unwrap_or(false);
                if accepted {
                    self.session = Some(username);
                    self.show(Page::Index);
                } else {
                    self.show(Page::Login { rejected: true });
                }
            }
            Target::LogoutButton | Target::LogoutLink => {
                self.session = None;
                self.show(Page::LoggedOut);
            }
            Target::AddLink => self.show(Page::AddUser),
            Target::Save => self.save(),
            Target::Row(name) | Target::DetailLink(name) | Target::NamedLink(name) => {
                if self.can("change") {
                    self.open_change_form(&name);
                } else if self.can("view") && !self.quirks.detail_forbidden {
                    self.show(Page::ViewUser(name));
                } else {
                    self.show(Page::Forbidden(detail_path(&name)));
                }
            }
            Target::StaffCheckbox => self.staff_checked = !self.staff_checked,
            Target::PermissionOption(key) => self.highlighted = Some(key),
            Target::PermissionAddLink => {
                if let Some(key) = self.highlighted.take() {
                    self.chosen.insert(key);
                }
            }
            _ => {}
        }
    }

    fn save(&mut self) {
        match self.page.clone() {
            Page::AddUser => {
                let username = self.field("username");
                let password = self.field("password1");
                let confirmation = self.field("password2");
                if username.is_empty()
                    || password.is_empty()
                    || password != confirmation
                    || self.users.contains_key(&username)
                {
                    return;
                }
                self.users.insert(
                    username.clone(),
                    FakeUser {
                        password,
                        is_staff: false,
                        is_superuser: false,
                        perms: BTreeSet::new(),
                    },
                );
                if self.quirks.add_returns_to_list {
                    self.show(Page::Changelist);
                } else {
                    self.open_change_form(&username);
                }
                self.flash(format!("The user “{}” was added successfully.", username));
            }
            Page::ChangeUser(username) => {
                let mut perms = self.chosen.clone();
                if self.quirks.view_grants_change && perms.contains("auth.view_user") {
                    perms.insert("auth.change_user".to_string());
                }
                let staff = self.staff_checked;
                if let Some(user) = self.users.get_mut(&username) {
                    user.is_staff = staff;
                    user.perms = perms;
                }
                self.show(Page::Changelist);
                self.flash(format!("The user “{}” was changed successfully.", username));
            }
            _ => {}
        }
    }

    fn flash(&mut self, message: String) {
        if !self.quirks.drop_messages {
            self.message = Some(message);
        }
    }

    fn text(&self) -> String {
        let header = match &self.session {
            Some(user) if self.on_admin_page() => {
                format!("Django administration\nWelcome, {}. View site / Change password / Log out\n", user)
            }
            _ => "Django administration\n".to_string(),
        };
        let message = self
            .message
            .as_ref()
            .map(|m| format!("{}\n", m))
            .unwrap_or_default();

        let body = match &self.page {
            Page::Blank => return String::new(),
            Page::Login { rejected } => {
                let error = if *rejected {
                    "Please enter the correct username and password for a staff account.\n"
                } else {
                    ""
                };
                format!("{}Username:\nPassword:\nLog in", error)
            }
            Page::Index => "Site administration\nAuthentication and Authorization\nGroups\nUsers".to_string(),
            Page::Changelist => {
                let names: Vec<&str> = self.users.keys().map(String::as_str).collect();
                format!("Select user to change\n{}", names.join("\n"))
            }
            Page::AddUser => "Add user\nUsername\nPassword\nPassword confirmation\nSave".to_string(),
            Page::ChangeUser(name) => format!(
                "Change user\n{}\n{}\nSave\nSave and add another\nSave and continue editing\nDelete",
                name,
                user_fieldsets(name)
            ),
            Page::ViewUser(name) => format!("View user\n{}\n{}\nClose", name, user_fieldsets(name)),
            Page::Forbidden(_) => return "403 Forbidden".to_string(),
            Page::LoggedOut => "Logged out\nThanks for spending some quality time with the web site today.\nLog in again".to_string(),
            Page::NotFound => return "Not Found".to_string(),
        };
        format!("{}{}{}", header, message, body)
    }

    fn title(&self) -> String {
        let heading = match &self.page {
            Page::Blank => return String::new(),
            Page::Forbidden(_) => return "403 Forbidden".to_string(),
            Page::NotFound => return "Not Found".to_string(),
            Page::Login { .. } => "Log in",
            Page::Index => "Site administration",
            Page::Changelist => "Select user to change",
            Page::AddUser => "Add user",
            Page::ChangeUser(_) => "Change user",
            Page::ViewUser(_) => "View user",
            Page::LoggedOut => "Logged out",
        };
        format!("{} | Django site admin", heading)
    }

    fn path(&self) -> String {
        match &self.page {
            Page::Blank => "about:blank".to_string(),
            Page::Login { .. } => "/admin/login/".to_string(),
            Page::Index | Page::NotFound => "/admin/".to_string(),
            Page::Changelist => "/admin/auth/user/".to_string(),
            Page::AddUser => "/admin/auth/user/add/".to_string(),
            Page::ChangeUser(name) | Page::ViewUser(name) => detail_path(name),
            Page::Forbidden(path) => path.clone(),
            Page::LoggedOut => "/admin/logout/".to_string(),
        }
    }
}

fn detail_path(username: &str) -> String {
    format!("/admin/auth/user/{}/change/", username)
}

/// Body of Django's stock UserAdmin form, shared by the change and view pages
fn user_fieldsets(username: &str) -> String {
    format!(
        "Username:\n{}\n\
         Required. 150 characters or fewer. Letters, digits and @/./+/-/_ only.\n\
         Password:\nRaw passwords are not stored, so there is no way to see this user's password.\n\
         Personal info\nFirst name:\nLast name:\nEmail address:\n\
         Permissions\n\
         Active\nDesignates whether this user should be treated as active. \
         Unselect this instead of deleting accounts.\n\
         Staff status\nDesignates whether the user can log into this admin site.\n\
         Superuser status\nDesignates that this user has all permissions without explicitly assigning them.\n\
         Groups:\nUser permissions:\nSpecific permissions for this user.\n\
         Important dates\nLast login:\nDate joined:",
        username
    )
}

/// Fake site handle; clones share the same state
#[derive(Clone)]
pub struct FakeAdmin {
    state: Arc<Mutex<State>>,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self::with_quirks(Quirks::default())
    }

    pub fn with_quirks(quirks: Quirks) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                users: BTreeMap::new(),
                session: None,
                page: Page::Blank,
                message: None,
                fields: HashMap::new(),
                staff_checked: false,
                chosen: BTreeSet::new(),
                highlighted: None,
                filter: String::new(),
                quirks,
                store_calls: Vec::new(),
            })),
        }
    }

    pub fn user(&self, username: &str) -> Option<FakeUser> {
        self.state.lock().users.get(username).cloned()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.state.lock().users.keys().cloned().collect()
    }

    pub fn logged_in_as(&self) -> Option<String> {
        self.state.lock().session.clone()
    }

    pub fn store_calls(&self) -> Vec<String> {
        self.state.lock().store_calls.clone()
    }
}

#[async_trait]
impl Browser for FakeAdmin {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        let mut s = self.state.lock();
        let path = url.strip_prefix(BASE_URL).unwrap_or(url);
        let page = match path {
            "/admin/login/" | "/admin/" if s.session.is_some() => Page::Index,
            "/admin/login/" | "/admin/" => Page::Login { rejected: false },
            "/admin/auth/user/" if s.session.is_none() => Page::Login { rejected: false },
            "/admin/auth/user/" if s.can("view") || s.can("change") => Page::Changelist,
            "/admin/auth/user/" => Page::Forbidden(path.to_string()),
            _ => Page::NotFound,
        };
        s.show(page);
        Ok(())
    }

    async fn is_present(&self, locator: &Locator) -> E2eResult<bool> {
        Ok(self.state.lock().resolve(locator).is_some())
    }

    async fn is_clickable(&self, locator: &Locator) -> E2eResult<bool> {
        self.is_present(locator).await
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        Ok(self
            .state
            .lock()
            .visible()
            .iter()
            .filter(|t| t.locator() == *locator)
            .count())
    }

    async fn click(&self, locator: &Locator) -> E2eResult<()> {
        let mut s = self.state.lock();
        let target = s.require(locator)?;
        s.click(target);
        Ok(())
    }

    async fn send_keys(&self, locator: &Locator, text: &str) -> E2eResult<()> {
        let mut s = self.state.lock();
        let key = match s.require(locator)? {
            Target::LoginUsername => "login_username",
            Target::LoginPassword => "login_password",
            Target::UsernameField => "username",
            Target::PasswordField => "password1",
            Target::ConfirmationField => "password2",
            Target::PermissionFilter => {
                s.filter.push_str(text);
                return Ok(());
            }
            other => {
                return Err(E2eError::ElementNotFound(format!("{:?} does not take input", other)));
            }
        };
        s.fields.entry(key.to_string()).or_default().push_str(text);
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> E2eResult<()> {
        let mut s = self.state.lock();
        match s.require(locator)? {
            Target::PermissionFilter => s.filter.clear(),
            Target::UsernameField => {
                s.fields.remove("username");
            }
            _ => {}
        }
        Ok(())
    }

    async fn is_selected(&self, locator: &Locator) -> E2eResult<bool> {
        let s = self.state.lock();
        Ok(matches!(s.require(locator)?, Target::StaffCheckbox) && s.staff_checked)
    }

    async fn page_text(&self) -> E2eResult<String> {
        Ok(self.state.lock().text())
    }

    async fn title(&self) -> E2eResult<String> {
        Ok(self.state.lock().title())
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(format!("{}{}", BASE_URL, self.state.lock().path()))
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
    }

    async fn quit(&self) -> E2eResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BackingStore for FakeAdmin {
    async fn reset(&self) -> E2eResult<()> {
        let mut s = self.state.lock();
        s.store_calls.push("reset".into());
        s.users.clear();
        s.session = None;
        s.show(Page::Blank);
        Ok(())
    }

    async fn create_superuser(&self, username: &str, _email: &str, password: &str) -> E2eResult<()> {
        let mut s = self.state.lock();
        s.store_calls.push(format!("create_superuser:{}", username));
        if s.users.contains_key(username) {
            return Err(E2eError::Store(format!("duplicate username {}", username)));
        }
        s.users.insert(
            username.to_string(),
            FakeUser {
                password: password.to_string(),
                is_staff: true,
                is_superuser: true,
                perms: BTreeSet::new(),
            },
        );
        Ok(())
    }

    async fn permissions(&self, username: &str) -> E2eResult<BTreeSet<Permission>> {
        let mut s = self.state.lock();
        s.store_calls.push(format!("permissions:{}", username));
        let user = s
            .users
            .get(username)
            .ok_or_else(|| E2eError::Store(format!("no user {}", username)))?;
        user.perms.iter().map(|key| key.parse()).collect()
    }

    async fn set_permissions(&self, username: &str, permissions: &BTreeSet<Permission>) -> E2eResult<()> {
        let mut s = self.state.lock();
        s.store_calls.push(format!("set_permissions:{}", username));
        let user = s
            .users
            .get_mut(username)
            .ok_or_else(|| E2eError::Store(format!("no user {}", username)))?;
        user.perms = permissions.iter().map(Permission::natural_key).collect();
        Ok(())
    }
}

/// Short waits so timeouts in tests resolve quickly
pub fn fast_options() -> RunnerOptions {
    RunnerOptions {
        wait: WaitPolicy::new(Duration::from_millis(100), Duration::from_millis(5)),
        ..Default::default()
    }
}

pub fn runner(site: &FakeAdmin, options: RunnerOptions) -> ScenarioRunner<FakeAdmin, FakeAdmin> {
    ScenarioRunner::new(site.clone(), site.clone(), AdminSite::new(BASE_URL), options)
}
