use thiserror::Error;

/// Errors returned by calls against the Orion platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrionError {
    /// Login answered but did not hand out a token.
    #[error("no auth token issued for username={0}")]
    NoToken(String),

    /// The platform refused the credentials.
    #[error("credentials rejected (status {0})")]
    Rejected(u16),

    /// The platform could not be reached at all.
    #[error("network failure: {0}")]
    Network(String),

    /// Any other unexpected status code.
    #[error("{endpoint} answered with unexpected status {status}")]
    Status { endpoint: String, status: u16 },

    /// Another engagement from the same identity is in progress.
    #[error("engagement conflict")]
    Conflict,

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Helper service (lyre, locris) failure.
    #[error("service error: {0}")]
    Service(String),
}

impl OrionError {
    /// Network-level failures deserve a backoff; everything else can be
    /// retried right away or is a hard refusal.
    pub fn is_network(&self) -> bool {
        matches!(self, OrionError::Network(_) | OrionError::WebSocket(_))
    }
}

impl From<reqwest::Error> for OrionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            OrionError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            OrionError::Status {
                endpoint: err.url().map(|u| u.path().to_string()).unwrap_or_default(),
                status: status.as_u16(),
            }
        } else {
            OrionError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OrionError {
    fn from(err: serde_json::Error) -> Self {
        OrionError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for OrionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        OrionError::WebSocket(err.to_string())
    }
}
