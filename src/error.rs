use orion_client::OrionError;
use thiserror::Error;

/// Failures of the session core. None of them is fatal to the host process
/// except a configuration error at start-up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(OrionError),

    #[error("group resolution failed: {0}")]
    Resolution(OrionError),

    #[error("engagement conflict")]
    EngagementConflict,

    #[error("engagement failed: {0}")]
    Engagement(OrionError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed uncleanly with code {code}")]
    TransportClosedUnclean { code: u16 },

    #[error("heartbeat acknowledgment failed: {0}")]
    HeartbeatLost(String),

    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("transmit failed: {0}")]
    Transmit(OrionError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// What the supervisor does about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// start over after the failure backoff
    Backoff,
    /// reconnect without delay
    Immediate,
    /// reconnect after the short close delay
    ShortDelay,
    /// re-engage on the live connection
    Reengage,
    /// hand the event on untouched
    Passthrough,
    Fatal,
}

impl SessionError {
    pub fn recovery(&self) -> Recovery {
        match self {
            SessionError::Auth(_)
            | SessionError::Resolution(_)
            | SessionError::Engagement(_)
            | SessionError::Transmit(_) => Recovery::Backoff,
            SessionError::EngagementConflict => Recovery::Immediate,
            SessionError::Transport(_) => Recovery::Immediate,
            SessionError::TransportClosedUnclean { .. } => Recovery::ShortDelay,
            SessionError::HeartbeatLost(_) => Recovery::Reengage,
            SessionError::DecryptionFailure(_) => Recovery::Passthrough,
            SessionError::Config(_) => Recovery::Fatal,
        }
    }

    /// Short operator-facing text for the status signal.
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionError::Auth(_) | SessionError::Resolution(_) | SessionError::Engagement(_) => {
                "Initialization Failed"
            }
            SessionError::EngagementConflict => "Re-engaging",
            SessionError::Transport(_) => "WebSocket Error",
            SessionError::TransportClosedUnclean { .. } => "WebSocket Closed",
            SessionError::HeartbeatLost(_) => "Re-engaging",
            SessionError::DecryptionFailure(_) => "Decryption Failed",
            SessionError::Transmit(_) => "Transmit Failed",
            SessionError::Config(_) => "Configuration Error",
        }
    }
}
