//! Flow store configuration

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Flow store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStoreConfig {
    /// Directory holding the flow files of a bot
    #[serde(default = "default_flow_dir")]
    pub flow_dir: String,

    /// Seconds an editing lock stays valid after its last refresh
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Distance between automatically placed nodes
    #[serde(default = "default_placing_step")]
    pub placing_step: f64,

    /// Horizontal position of the first automatically placed node
    #[serde(default = "default_min_pos_x")]
    pub min_pos_x: f64,
}

fn default_flow_dir() -> String {
    "flows".to_string()
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_placing_step() -> f64 {
    250.0
}

fn default_min_pos_x() -> f64 {
    50.0
}

impl Default for FlowStoreConfig {
    fn default() -> Self {
        Self {
            flow_dir: default_flow_dir(),
            lock_ttl_secs: default_lock_ttl_secs(),
            placing_step: default_placing_step(),
            min_pos_x: default_min_pos_x(),
        }
    }
}

impl FlowStoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("COLLOQUY_FLOW_DIR") {
            config.flow_dir = dir;
        }

        if let Ok(ttl) = env::var("COLLOQUY_FLOW_LOCK_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(ttl) => config.lock_ttl_secs = ttl,
                Err(_) => warn!("Invalid COLLOQUY_FLOW_LOCK_TTL_SECS value: {}", ttl),
            }
        }

        config
    }

    /// Lock time-to-live
    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs as i64)
    }
}
