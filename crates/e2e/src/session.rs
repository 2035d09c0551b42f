//! Login session state machine
//!
//! `Anonymous -> Authenticating -> Authenticated -> Anonymous`, or
//! `Authenticating -> Failed`. Every other move is rejected.

use std::fmt;

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticating(String),
    Authenticated(String),
    Failed(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Anonymous => write!(f, "anonymous"),
            SessionState::Authenticating(user) => write!(f, "authenticating({})", user),
            SessionState::Authenticated(user) => write!(f, "authenticated({})", user),
            SessionState::Failed(user) => write!(f, "failed({})", user),
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Username of the authenticated account, if any
    pub fn current_user(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Username of the authenticated account, or `NotAuthenticated` naming `action`
    pub fn require_authenticated(&self, action: &str) -> E2eResult<&str> {
        self.current_user()
            .ok_or_else(|| E2eError::NotAuthenticated(format!("{} (session is {})", action, self.state)))
    }

    pub fn begin_login(&mut self, username: &str) -> E2eResult<()> {
        let next = SessionState::Authenticating(username.to_string());
        match self.state {
            SessionState::Anonymous => {
                self.state = next;
                Ok(())
            }
            _ => Err(self.invalid(&next)),
        }
    }

    pub fn complete_login(&mut self) -> E2eResult<()> {
        match &self.state {
            SessionState::Authenticating(user) => {
                self.state = SessionState::Authenticated(user.clone());
                Ok(())
            }
            _ => Err(self.invalid(&SessionState::Authenticated(String::new()))),
        }
    }

    pub fn fail_login(&mut self) -> E2eResult<()> {
        match &self.state {
            SessionState::Authenticating(user) => {
                self.state = SessionState::Failed(user.clone());
                Ok(())
            }
            _ => Err(self.invalid(&SessionState::Failed(String::new()))),
        }
    }

    pub fn end(&mut self) -> E2eResult<()> {
        match self.state {
            SessionState::Authenticated(_) => {
                self.state = SessionState::Anonymous;
                Ok(())
            }
            _ => Err(self.invalid(&SessionState::Anonymous)),
        }
    }

    fn invalid(&self, to: &SessionState) -> E2eError {
        E2eError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}
