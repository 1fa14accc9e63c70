use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use orion_client::Credentials;
use tracing::{error, info};

use crate::error::SessionError;

pub const USERNAME: &str = "ORION_USERNAME";
pub const PASSWORD: &str = "ORION_PASSWORD";

#[async_trait]
pub trait SecretsManagerType: Send + Sync {
    fn keys(&self) -> Vec<String>;
    async fn reveal(&self, key: &str) -> Option<String>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct SecretsManager(pub Arc<dyn SecretsManagerType>);

impl SecretsManager {
    pub async fn get_secret(&self, key: &str) -> Option<String> {
        self.0.reveal(key).await
    }

    /// Platform credentials. Missing values are a configuration error.
    pub async fn credentials(&self) -> Result<Credentials, SessionError> {
        let username = self.required(USERNAME).await?;
        let password = self.required(PASSWORD).await?;
        Ok(Credentials::new(username, password))
    }

    async fn required(&self, key: &str) -> Result<String, SessionError> {
        self.get_secret(key)
            .await
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SessionError::Config(format!("secret {key} is not set in {}", self.0.name())))
    }
}

impl Debug for SecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretsManager({}, keys: {:?})", self.0.name(), self.0.keys())
    }
}

/// Secrets from a `.env` file, falling back to the process environment.
pub struct EnvSecretsManager {
    secrets: RwLock<HashMap<String, String>>,
    env_path: Option<PathBuf>,
}

impl EnvSecretsManager {
    pub fn new(dotenv_path: Option<PathBuf>) -> Arc<Self> {
        let mgr = Arc::new(Self {
            secrets: RwLock::new(HashMap::new()),
            env_path: dotenv_path.clone(),
        });
        match dotenv_path {
            Some(path) if path.exists() => mgr.load_dotenv(&path),
            Some(path) => info!("{} not found, secrets come from the environment", path.display()),
            None => {}
        }
        mgr
    }

    /// Parse only the given `.env` file, replacing what was loaded before.
    fn load_dotenv(&self, path: &Path) {
        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                let mut loaded = HashMap::new();
                for item in iter {
                    match item {
                        Ok((k, v)) => {
                            loaded.insert(k, v);
                        }
                        Err(e) => error!("Malformed line in {}: {}", path.display(), e),
                    }
                }
                if let Ok(mut secrets) = self.secrets.write() {
                    *secrets = loaded;
                }
            }
            Err(e) => error!("could not read {}: {}", path.display(), e),
        }
    }
}

impl Debug for EnvSecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnvSecretsManager {{ path: {:?}, keys: {:?} }}", self.env_path, self.keys())
    }
}

#[async_trait]
impl SecretsManagerType for EnvSecretsManager {
    fn keys(&self) -> Vec<String> {
        self.secrets
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn reveal(&self, key: &str) -> Option<String> {
        let from_file = self.secrets.read().ok().and_then(|s| s.get(key).cloned());
        from_file.or_else(|| std::env::var(key).ok())
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

/// In-memory secrets, for hosts that hand credentials over directly.
#[derive(Default)]
pub struct MapSecretsManager {
    map: DashMap<String, String>,
}

impl MapSecretsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_credentials(username: &str, password: &str) -> Arc<Self> {
        let mgr = Self::default();
        mgr.insert(USERNAME, username);
        mgr.insert(PASSWORD, password);
        Arc::new(mgr)
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SecretsManagerType for MapSecretsManager {
    fn keys(&self) -> Vec<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }

    async fn reveal(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn name(&self) -> &'static str {
        "map"
    }
}
