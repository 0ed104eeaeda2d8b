use std::fmt::Debug;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Which store implementation backs the registry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// The distributed store of record shared with other replicas.
    Etcd,
    /// In-process store for tests and local development.
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// etcd endpoints, e.g. `["http://127.0.0.1:2379"]`
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// TTL on instance liveness records. A registered instance is live
    /// only while this TTL has not lapsed, so instances must heartbeat
    /// at a shorter interval.
    #[serde(default = "default_endpoint_key_ttl_secs")]
    pub endpoint_key_ttl_secs: u64,

    /// Connect timeout for the etcd client
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoints: Vec::new(),
            endpoint_key_ttl_secs: default_endpoint_key_ttl_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_key_ttl_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "store.endpoint_key_ttl_secs must be greater than 0".into(),
            )));
        }
        if self.backend == StoreBackend::Etcd && self.endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "store.endpoints is required for the etcd backend".into(),
            )));
        }
        Ok(())
    }

    pub fn endpoint_key_ttl(&self) -> Duration {
        Duration::from_secs(self.endpoint_key_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Etcd
}
fn default_endpoint_key_ttl_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    5
}
