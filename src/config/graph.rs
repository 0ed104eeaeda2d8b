use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GraphConfig {
    /// TTL on dependency graph marker keys
    #[serde(default = "default_key_ttl_secs")]
    pub key_ttl_secs: u64,

    /// Interval at which tracked graph markers are rewritten with a
    /// fresh timestamp; must be well below the key TTL.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            key_ttl_secs: default_key_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs >= self.key_ttl_secs {
            return Err(Error::Config(ConfigError::Message(
                "graph.refresh_interval_secs must be below graph.key_ttl_secs".into(),
            )));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

// 24 hours
fn default_key_ttl_secs() -> u64 {
    86_400
}
// 2 hours
fn default_refresh_interval_secs() -> u64 {
    7_200
}
