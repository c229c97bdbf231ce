//! Configuration for the Colloquy console runner
//!
//! Settings come from an optional JSON file named by `COLLOQUY_CONFIG`,
//! then from environment variables.

use colloquy_core::{CoreError, EngineConfig};
use colloquy_flows::FlowStoreConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::info;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory of bot data
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Bot to chat with
    #[serde(default = "default_bot_id")]
    pub bot_id: String,

    /// Identity of the console user, also used as the session id
    #[serde(default = "default_user")]
    pub user: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dialog engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Flow store settings
    #[serde(default)]
    pub flows: FlowStoreConfig,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_bot_id() -> String {
    "default".to_string()
}

fn default_user() -> String {
    "console".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bot_id: default_bot_id(),
            user: default_user(),
            log_level: default_log_level(),
            engine: EngineConfig::default(),
            flows: FlowStoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self, CoreError> {
        let mut config = match env::var("COLLOQUY_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self {
                engine: EngineConfig::from_env(),
                flows: FlowStoreConfig::from_env(),
                ..Self::default()
            },
        };

        if let Ok(data_dir) = env::var("COLLOQUY_DATA_DIR") {
            config.data_dir = data_dir;
        }

        if let Ok(bot_id) = env::var("COLLOQUY_BOT_ID") {
            config.bot_id = bot_id;
        }

        if let Ok(user) = env::var("COLLOQUY_USER") {
            config.user = user;
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigurationError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            CoreError::ConfigurationError(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.bot_id.trim().is_empty() {
            return Err(CoreError::ConfigurationError("bot_id must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(CoreError::ConfigurationError("user must not be empty".to_string()));
        }
        if self.engine.max_node_visits == 0 {
            return Err(CoreError::ConfigurationError(
                "engine.max_node_visits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "bot_id": "support", "engine": {{ "max_node_visits": 5 }}, "flows": {{ "flow_dir": "dialogs" }} }}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(config.bot_id, "support");
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.engine.max_node_visits, 5);
        assert_eq!(config.engine.default_flow, "main.flow.json");
        assert_eq!(config.flows.flow_dir, "dialogs");
        assert_eq!(config.flows.lock_ttl_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(CoreError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_empty_bot_is_rejected() {
        let config = AppConfig {
            bot_id: " ".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
