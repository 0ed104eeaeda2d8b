//! Configuration for the registry server.
//!
//! Loaded from an optional toml file plus `SVCHUB`-prefixed environment
//! variables (highest priority). Every field has a serde default so an
//! empty config is a valid one.

mod graph;
mod registry;
mod rpc;
mod store;
pub use graph::*;
pub use registry::*;
pub use rpc::*;
pub use store::*;


//---
use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    /// Backing store connection and TTL parameters
    #[serde(default)]
    pub store: StoreConfig,
    /// Hub fanout and rectification parameters
    #[serde(default)]
    pub registry: RegistryConfig,
    /// RPC server parameters
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Dependency graph marker parameters
    #[serde(default)]
    pub graph: GraphConfig,
    /// Directory for the server log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            rpc: RpcConfig::default(),
            graph: GraphConfig::default(),
            log_dir: default_log_dir(),
        }
    }
}

impl Settings {
    /// Load configuration with priority:
    /// 1. `config/svchub` file (optional)
    /// 2. Custom file passed by the caller
    /// 3. Environment variables (highest priority)
    pub fn load(custom_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder().add_source(File::with_name("config/svchub").required(false));

        if let Some(path) = custom_path {
            config = config.add_source(File::with_name(path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("SVCHUB")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = config.build()?.try_deserialize().map_err(crate::Error::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.registry.validate()?;
        self.rpc.validate()?;
        self.graph.validate()?;
        Ok(())
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
