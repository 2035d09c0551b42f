//! Declarative YAML scenarios and their expansion into runner steps

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::account::{Account, Permission};
use crate::error::{E2eError, E2eResult};

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whether the scenario is meant to pass or to be caught failing
    #[serde(default)]
    pub expect: Expectation,

    /// Created directly in the backing store; the only account not made through the UI
    pub superuser: Account,

    /// Created through the admin's add form while logged in as the superuser
    #[serde(default)]
    pub accounts: Vec<Account>,

    /// Access checks performed after the superuser logs out
    #[serde(default)]
    pub checks: Vec<DenialCheck>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    #[default]
    Success,
    Failure,
}

/// Log in as `actor` and expect every detail view in `denied` to be refused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialCheck {
    pub actor: String,
    pub denied: Vec<String>,
}

/// One unit of work for the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioStep {
    Bootstrap(Account),
    Login { username: String, password: String },
    CreateAccount(Account),
    VerifyPermissions {
        username: String,
        permissions: BTreeSet<Permission>,
    },
    AssertListed(Vec<String>),
    AssertDenied(String),
    Logout,
}

impl ScenarioStep {
    pub fn name(&self) -> String {
        match self {
            ScenarioStep::Bootstrap(account) => format!("bootstrap:{}", account.username),
            ScenarioStep::Login { username, .. } => format!("login:{}", username),
            ScenarioStep::CreateAccount(account) => format!("create:{}", account.username),
            ScenarioStep::VerifyPermissions { username, .. } => format!("verify-permissions:{}", username),
            ScenarioStep::AssertListed(users) => format!("assert-listed:{}", users.join(",")),
            ScenarioStep::AssertDenied(username) => format!("assert-denied:{}", username),
            ScenarioStep::Logout => "logout".to_string(),
        }
    }
}

impl ScenarioSpec {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, sorted by file name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// The canonical check: a staff account holding only "Can view user"
    /// must not be able to open the change form of three plain accounts
    pub fn view_only_staff() -> Self {
        Self {
            name: "view-only-staff".to_string(),
            description: "A staff user with 'Can view user' sees but cannot edit other users".to_string(),
            tags: vec!["permissions".to_string(), "smoke".to_string()],
            expect: Expectation::Success,
            superuser: Account::new("isard", "pirineus").with_email("isard@isardvdi.com"),
            accounts: std::iter::once(
                Account::new("staff1", "staffpass")
                    .staff()
                    .with_permission(Permission::view_user()),
            )
            .chain((1..=3).map(|i| Account::new(format!("user{}", i), "userpass")))
            .collect(),
            checks: vec![DenialCheck {
                actor: "staff1".to_string(),
                denied: (1..=3).map(|i| format!("user{}", i)).collect(),
            }],
        }
    }

    /// Reject scenarios the runner could not execute
    pub fn validate(&self) -> E2eResult<()> {
        let mut seen = BTreeSet::new();
        seen.insert(self.superuser.username.as_str());

        for account in &self.accounts {
            if !seen.insert(account.username.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "{}: account '{}' is declared twice (the superuser is created once, in the backing store)",
                    self.name, account.username
                )));
            }
        }

        for check in &self.checks {
            if !seen.contains(check.actor.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "{}: check actor '{}' is not a declared account",
                    self.name, check.actor
                )));
            }
            if let Some(target) = check.denied.iter().find(|t| !seen.contains(t.as_str())) {
                return Err(E2eError::SpecParse(format!(
                    "{}: check target '{}' is not a declared account",
                    self.name, target
                )));
            }
        }
        Ok(())
    }

    /// Expand into the ordered steps the runner executes
    pub fn steps(&self) -> E2eResult<Vec<ScenarioStep>> {
        self.validate()?;

        let passwords: HashMap<&str, &str> = std::iter::once(&self.superuser)
            .chain(&self.accounts)
            .map(|a| (a.username.as_str(), a.password.as_str()))
            .collect();

        let mut steps = vec![
            ScenarioStep::Bootstrap(self.superuser.clone()),
            ScenarioStep::Login {
                username: self.superuser.username.clone(),
                password: self.superuser.password.clone(),
            },
        ];

        for account in &self.accounts {
            steps.push(ScenarioStep::CreateAccount(account.clone()));
            if !account.permissions.is_empty() {
                steps.push(ScenarioStep::VerifyPermissions {
                    username: account.username.clone(),
                    permissions: account.permissions.iter().cloned().collect(),
                });
            }
        }

        if !self.accounts.is_empty() {
            steps.push(ScenarioStep::AssertListed(
                self.accounts.iter().map(|a| a.username.clone()).collect(),
            ));
        }
        steps.push(ScenarioStep::Logout);

        for check in &self.checks {
            steps.push(ScenarioStep::Login {
                username: check.actor.clone(),
                password: passwords[check.actor.as_str()].to_string(),
            });
            steps.extend(check.denied.iter().cloned().map(ScenarioStep::AssertDenied));
            steps.push(ScenarioStep::Logout);
        }

        Ok(steps)
    }
}
