use std::net::SocketAddr;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port for the prometheus /metrics endpoint
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Base duration of the randomized auto-disconnect horizon. The
    /// actual horizon is this plus a uniform-random jitter of up to one
    /// more base duration, to avoid thundering-herd reconnects.
    #[serde(default = "default_auto_disconnect_secs")]
    pub auto_disconnect_secs: u64,

    /// Per-send timeout on the resolve stream; a client that does not
    /// consume an update within it is presumed wedged and the stream
    /// is abandoned.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    #[serde(default = "default_tcp_keepalive_secs")]
    pub tcp_keepalive_secs: u64,

    #[serde(default = "default_http2_keepalive_interval_secs")]
    pub http2_keepalive_interval_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_port: default_metrics_port(),
            auto_disconnect_secs: default_auto_disconnect_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            tcp_keepalive_secs: default_tcp_keepalive_secs(),
            http2_keepalive_interval_secs: default_http2_keepalive_interval_secs(),
        }
    }
}

impl RpcConfig {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            Error::Config(ConfigError::Message(format!(
                "rpc.listen_addr {:?} is not a socket address: {}",
                self.listen_addr, e
            )))
        })?;
        if self.auto_disconnect_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "rpc.auto_disconnect_secs must be greater than 0".into(),
            )));
        }
        if self.send_timeout_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "rpc.send_timeout_secs must be greater than 0".into(),
            )));
        }
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| Error::Config(ConfigError::Message(format!("rpc.listen_addr: {}", e))))
    }

    pub fn auto_disconnect(&self) -> Duration {
        Duration::from_secs(self.auto_disconnect_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:1900".to_string()
}
fn default_metrics_port() -> u16 {
    1920
}
fn default_auto_disconnect_secs() -> u64 {
    300
}
fn default_send_timeout_secs() -> u64 {
    10
}
fn default_tcp_keepalive_secs() -> u64 {
    3600
}
fn default_http2_keepalive_interval_secs() -> u64 {
    300
}
