use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt};

use async_trait::async_trait;
use dashmap::DashMap;
use orion_client::Endpoints;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatch::DispatchConfig;
use crate::engagement::Verbosity;
use crate::error::SessionError;
use crate::groups::GroupSpec;
use crate::heartbeat::DEFAULT_IDLE_TIMEOUT;

pub const GROUP_IDS: &str = "ORION_GROUP_IDS";
pub const VERBOSITY: &str = "ORION_VERBOSITY";
pub const IGNORE_SELF: &str = "ORION_IGNORE_SELF";
pub const HEARTBEAT_MS: &str = "ORION_HEARTBEAT_MS";
pub const RETRY_DELAY_MS: &str = "ORION_RETRY_DELAY_MS";
pub const CLOSE_RETRY_DELAY_MS: &str = "ORION_CLOSE_RETRY_DELAY_MS";
pub const SURFACE_PINGS: &str = "ORION_SURFACE_PINGS";

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_CLOSE_RETRY_DELAY: Duration = Duration::from_millis(1000);

#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
    async fn del(&self, key: &str);
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, seeded from an optional `.env` file.
/// Values set through the manager stay in memory and shadow the environment.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
    overrides: DashMap<String, String>,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(e) => warn!("could not parse {}: {}", env_file.display(), e),
            }
        } else {
            info!("no .env at {}, using process environment", env_file.display())
        }

        Box::new(Self {
            env_file,
            overrides: DashMap::new(),
        })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value.clone());
        }
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), value.to_string());
    }

    async fn del(&self, key: &str) {
        self.overrides.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self { map: DashMap::new() })
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let map = DashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Box::new(Self { map })
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Settings of one RX node.
#[derive(Debug, Clone, PartialEq)]
pub struct OrionConfig {
    pub groups: GroupSpec,
    pub verbosity: Verbosity,
    pub ignore_self: bool,
    pub surface_pings: bool,
    pub idle_timeout: Duration,
    pub retry_delay: Duration,
    pub close_retry_delay: Duration,
    pub endpoints: Endpoints,
}

impl OrionConfig {
    pub fn new(groups: GroupSpec) -> Self {
        Self {
            groups,
            verbosity: Verbosity::default(),
            ignore_self: false,
            surface_pings: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            close_retry_delay: DEFAULT_CLOSE_RETRY_DELAY,
            endpoints: Endpoints::default(),
        }
    }

    /// Read every `ORION_*` key through `config`.
    pub async fn load(config: &ConfigManager) -> Result<Self, SessionError> {
        let mut values = HashMap::new();
        let keys = [
            GROUP_IDS,
            VERBOSITY,
            IGNORE_SELF,
            HEARTBEAT_MS,
            RETRY_DELAY_MS,
            CLOSE_RETRY_DELAY_MS,
            SURFACE_PINGS,
        ];
        for key in keys.into_iter().chain(Endpoints::KEYS) {
            if let Some(value) = config.get(key).await {
                values.insert(key.to_string(), value);
            }
        }
        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let groups = lookup(GROUP_IDS)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SessionError::Config(format!("{GROUP_IDS} is not set")))?;
        let mut config = Self::new(GroupSpec::parse(&groups));

        if let Some(raw) = lookup(VERBOSITY) {
            config.verbosity = Verbosity::from_str(raw.trim())
                .map_err(|_| SessionError::Config(format!("{VERBOSITY}: unknown verbosity {raw:?}")))?;
        }
        if let Some(raw) = lookup(IGNORE_SELF) {
            config.ignore_self = parse_bool(IGNORE_SELF, &raw)?;
        }
        if let Some(raw) = lookup(SURFACE_PINGS) {
            config.surface_pings = parse_bool(SURFACE_PINGS, &raw)?;
        }
        if let Some(raw) = lookup(HEARTBEAT_MS) {
            config.idle_timeout = parse_millis(HEARTBEAT_MS, &raw)?;
        }
        if let Some(raw) = lookup(RETRY_DELAY_MS) {
            config.retry_delay = parse_millis(RETRY_DELAY_MS, &raw)?;
        }
        if let Some(raw) = lookup(CLOSE_RETRY_DELAY_MS) {
            config.close_retry_delay = parse_millis(CLOSE_RETRY_DELAY_MS, &raw)?;
        }
        config.endpoints = Endpoints::from_lookup(lookup);
        Ok(config)
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            ignore_self: self.ignore_self,
            surface_pings: self.surface_pings,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, SessionError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(SessionError::Config(format!("{key}: expected a boolean, got {raw:?}"))),
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, SessionError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| SessionError::Config(format!("{key}: expected milliseconds, got {raw:?}")))
}
