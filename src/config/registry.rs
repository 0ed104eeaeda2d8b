use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Interval of the per-service snapshot re-push that heals missed
    /// or dropped deliveries.
    #[serde(default = "default_auto_rectify_interval_secs")]
    pub auto_rectify_interval_secs: u64,

    /// How long a fanout delivery may wait on a full observer queue
    /// before the update is dropped for that observer.
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auto_rectify_interval_secs: default_auto_rectify_interval_secs(),
            notify_timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.auto_rectify_interval_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "registry.auto_rectify_interval_secs must be greater than 0".into(),
            )));
        }
        if self.notify_timeout_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "registry.notify_timeout_secs must be greater than 0".into(),
            )));
        }
        Ok(())
    }

    pub fn auto_rectify_interval(&self) -> Duration {
        Duration::from_secs(self.auto_rectify_interval_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

fn default_auto_rectify_interval_secs() -> u64 {
    60
}
fn default_notify_timeout_secs() -> u64 {
    5
}
