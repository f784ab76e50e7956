use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable overriding [`ServerConfig::bind`].
pub const ENV_BIND: &str = "NDJSON_SYNC_BIND";
/// Environment variable overriding [`ServerConfig::log_filter`].
pub const ENV_LOG: &str = "NDJSON_SYNC_LOG";
/// Environment variable pointing at the config file.
pub const ENV_CONFIG: &str = "NDJSON_SYNC_CONFIG";

/// Sync server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
    /// Tracing filter directives, e.g. `ndjson_sync=debug`
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            log_filter: "ndjson_sync=info,tower_http=info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path.or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from));
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    fn load_with_env(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
            config =
                serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.clone(), e))?;
        }

        if let Some(bind) = env(ENV_BIND) {
            config.bind = bind;
        }
        if let Some(filter) = env(ENV_LOG) {
            config.log_filter = filter;
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/ndjson-sync/server.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("ndjson-sync")
            .join("server.yaml")
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, #[source] serde_yaml::Error),
}
