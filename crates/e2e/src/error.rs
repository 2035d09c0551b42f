//! Error types for E2E scenarios

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Backing store error: {0}")]
    Store(String),

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Timeout after {waited:?} waiting for {what}\n--- page text ---\n{page}")]
    Timeout {
        what: String,
        waited: Duration,
        page: String,
    },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Form submission failed: {form} never showed a success message\n--- page text ---\n{page}")]
    FormSubmission { form: String, page: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No authenticated session for: {0}")]
    NotAuthenticated(String),

    #[error("Superuser already bootstrapped as {0}")]
    AlreadyBootstrapped(String),

    #[error("No superuser bootstrapped before login as {0}")]
    NotBootstrapped(String),

    #[error("WebDriver error: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("WebDriver session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
