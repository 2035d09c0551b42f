//! Django admin permission E2E checks
//!
//! This crate drives a real browser over WebDriver against a Django admin
//! site and verifies that restricted staff accounts can list, but not edit,
//! other users:
//! - Spawns the site with `manage.py runserver` (or targets a running one)
//! - Bootstraps the superuser and flushes data through `manage.py shell`
//! - Parses declarative YAML scenarios into ordered runner steps
//! - Waits with explicit bounded polls, never with implicit sleeps
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Harness                                  │
//! │    ├── ServerHandle (runserver + health check)              │
//! │    ├── WebDriverBrowser (fantoccini session)                │
//! │    └── ManagePy (backing store: flush, superuser, perms)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner<Browser, BackingStore>                      │
//! │    ├── bootstrap_superuser / login / logout                 │
//! │    ├── create_restricted_user / verify_permissions          │
//! │    └── assert_listed / assert_access_denied                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioSpec (YAML)                                        │
//! │    ├── superuser, accounts: [Account]                       │
//! │    ├── checks: [{ actor, denied: [username] }]              │
//! │    └── expect: success | failure                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod account;
pub mod admin;
pub mod browser;
pub mod error;
pub mod harness;
pub mod runner;
pub mod server;
pub mod session;
pub mod spec;
pub mod store;
pub mod wait;

pub use account::{Account, Permission};
pub use browser::{Browser, Locator, WebDriverBrowser};
pub use error::{E2eError, E2eResult};
pub use harness::Harness;
pub use runner::{RunnerOptions, ScenarioRunner};
pub use spec::{ScenarioSpec, ScenarioStep};
pub use store::{BackingStore, ManagePy};
