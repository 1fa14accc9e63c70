use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Long-lived login credentials. Owned by the caller, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { username: username.into(), secret: secret.into() }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Short-lived authenticated session handed out by `login`.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    pub user_id: String,
    /// Platform session id, needed to log the token out again.
    pub session_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            session_id,
            issued_at: Utc::now(),
        }
    }

    /// The raw auth token. Only ever sent to the platform's own endpoints.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("issued_at", &self.issued_at)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Body returned by `POST /api/login`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}
