//! The slice of the Django admin the scenarios touch: URLs and element locators

use crate::browser::Locator;

/// Django's "messages" success entry, shown after a form is saved
pub const SUCCESS_MESSAGE: &str = ".messagelist .success";

/// Default vocabulary signalling a permission denial, matched against the page title
pub const DEFAULT_DENIAL_MARKERS: &[&str] = &["permission", "forbid"];

/// Title prefix of the read-only page Django serves to view-only staff
pub const READ_ONLY_TITLE_PREFIX: &str = "view ";

/// URLs of an admin site mounted at `/admin/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSite {
    base_url: String,
}

impl AdminSite {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn login_url(&self) -> String {
        self.url("/admin/login/")
    }

    pub fn index_url(&self) -> String {
        self.url("/admin/")
    }

    /// Changelist of `django.contrib.auth` users
    pub fn users_url(&self) -> String {
        self.url("/admin/auth/user/")
    }
}

// Login page

pub fn login_username() -> Locator {
    Locator::name("username")
}

pub fn login_password() -> Locator {
    Locator::name("password")
}

pub fn login_submit() -> Locator {
    Locator::css("#login-form input[type='submit']")
}

/// Header block rendered only for authenticated admin users
pub fn user_tools() -> Locator {
    Locator::id("user-tools")
}

/// Logout controls in the order they are tried: the POST form of current
/// Django releases, then the plain link of older ones
pub fn logout_controls() -> [Locator; 2] {
    [
        Locator::xpath("//form[@id='logout-form']//button[@type='submit']"),
        Locator::css("#user-tools a[href$='/logout/']"),
    ]
}

// Users changelist

pub fn add_user_link() -> Locator {
    Locator::css("a.addlink")
}

/// Row of the results table linking to `username`
pub fn user_row(username: &str) -> Locator {
    Locator::xpath(format!(
        "//table[@id='result_list']//tr[.//a[text()={}]]",
        xpath_literal(username)
    ))
}

/// Detail link inside the row of `username`
pub fn user_detail_link(username: &str) -> Locator {
    Locator::xpath(format!(
        "//table[@id='result_list']//tr//a[text()={}]",
        xpath_literal(username)
    ))
}

/// Any link labelled with `username` (changelist or confirmation message)
pub fn user_link_text(username: &str) -> Locator {
    Locator::link_text(username)
}

pub fn success_message() -> Locator {
    Locator::css(SUCCESS_MESSAGE)
}

// User add / change forms

pub fn username_field() -> Locator {
    Locator::id("id_username")
}

pub fn password_field() -> Locator {
    Locator::id("id_password1")
}

pub fn password_confirmation_field() -> Locator {
    Locator::id("id_password2")
}

pub fn save_button() -> Locator {
    Locator::name("_save")
}

pub fn staff_checkbox() -> Locator {
    Locator::id("id_is_staff")
}

/// Filter box above the available-permissions list
pub fn permission_filter() -> Locator {
    Locator::id("id_user_permissions_input")
}

/// Entry of the available-permissions list whose label contains `label`
pub fn permission_option(label: &str) -> Locator {
    Locator::xpath(format!(
        "//select[@id='id_user_permissions_from']/option[contains(text(), {})]",
        xpath_literal(label)
    ))
}

/// Arrow moving the highlighted permissions to the chosen list
pub fn permission_add_link() -> Locator {
    Locator::id("id_user_permissions_add_link")
}

/// Quote `value` as an XPath 1.0 string literal
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value
            .split('\'')
            .map(|part| format!("'{}'", part))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Why an opened detail page counts as refused, or `None` if it was not.
///
/// A page that still offers the save control is never a denial. Otherwise
/// only the title is inspected: the change form lists "Permissions" among
/// its fieldsets, so body text cannot tell the two cases apart.
pub fn denial_reason<S: AsRef<str>>(title: &str, editable: bool, markers: &[S]) -> Option<String> {
    if editable {
        return None;
    }
    let title = title.trim().to_lowercase();
    if let Some(marker) = markers
        .iter()
        .map(|marker| marker.as_ref())
        .find(|marker| !marker.is_empty() && title.contains(&marker.to_lowercase()))
    {
        return Some(marker.to_string());
    }
    title
        .starts_with(READ_ONLY_TITLE_PREFIX)
        .then(|| "read-only view".to_string())
}
