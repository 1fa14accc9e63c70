use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Five-state health signal shown to operators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Disconnected,
    Connecting,
    Connected,
    Engaged,
    Error,
}

impl Health {
    /// Indicator colour used by flow editors.
    pub fn fill(self) -> &'static str {
        match self {
            Health::Disconnected | Health::Error => "red",
            Health::Connecting => "yellow",
            Health::Connected | Health::Engaged => "green",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeStatus {
    pub health: Health,
    pub text: String,
}

impl NodeStatus {
    pub fn new(health: Health, text: impl Into<String>) -> Self {
        Self { health, text: text.into() }
    }

    pub fn disconnected() -> Self {
        Self::new(Health::Disconnected, "Disconnected")
    }

    pub fn connecting(text: impl Into<String>) -> Self {
        Self::new(Health::Connecting, text)
    }

    pub fn connected() -> Self {
        Self::new(Health::Connected, "Connected")
    }

    pub fn engaged(verbosity: impl std::fmt::Display) -> Self {
        Self::new(Health::Engaged, format!("Engaged ({verbosity})"))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Health::Error, text)
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}
