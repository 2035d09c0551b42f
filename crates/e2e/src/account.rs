//! Accounts and permissions as the scenarios see them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::E2eError;

/// A user account on the admin site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,

    pub password: String,

    #[serde(default)]
    pub email: String,

    /// Grant "staff status" (required to log into the admin)
    #[serde(default)]
    pub staff: bool,

    /// Permissions to select in the change form, as `app_label.codename`
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: String::new(),
            staff: false,
            permissions: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn staff(mut self) -> Self {
        self.staff = true;
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Whether creating this account needs a second pass through the change form
    pub fn needs_change_form(&self) -> bool {
        self.staff || !self.permissions.is_empty()
    }
}

/// The four default model permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Add,
    Change,
    Delete,
    View,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Delete => "delete",
            Action::View => "view",
        }
    }
}

/// A model permission identified by its natural key, e.g. `auth.view_user`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    pub app_label: String,
    pub codename: String,
}

impl Permission {
    pub fn new(app_label: impl Into<String>, codename: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            codename: codename.into(),
        }
    }

    /// Default permission for `action` on `app_label.model`
    pub fn for_model(app_label: &str, model: &str, action: Action) -> Self {
        Self::new(app_label, format!("{}_{}", action.as_str(), model))
    }

    /// `auth.view_user`
    pub fn view_user() -> Self {
        Self::for_model("auth", "user", Action::View)
    }

    /// `auth.change_user`
    pub fn change_user() -> Self {
        Self::for_model("auth", "user", Action::Change)
    }

    /// `app_label.codename`
    pub fn natural_key(&self) -> String {
        format!("{}.{}", self.app_label, self.codename)
    }

    /// Label shown in the admin's permission picker, e.g. "Can view user".
    ///
    /// Only default permissions follow the `<action>_<model>` codename layout;
    /// custom codenames are shown verbatim.
    pub fn ui_label(&self) -> String {
        match self.codename.split_once('_') {
            Some((action, model))
                if matches!(action, "add" | "change" | "delete" | "view") && !model.is_empty() =>
            {
                format!("Can {} {}", action, model)
            }
            _ => self.codename.clone(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.codename)
    }
}

impl FromStr for Permission {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((app, codename)) if !app.is_empty() && !codename.is_empty() && !codename.contains('.') => {
                Ok(Self::new(app, codename))
            }
            _ => Err(E2eError::SpecParse(format!(
                "permission '{}' is not of the form app_label.codename",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Permission {
    type Error = E2eError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.natural_key()
    }
}
