//! Error hierarchy for the registry, categorized by subsystem: the backing
//! store, the RPC surface, and configuration.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backing key-value store failures (network, lease, watch)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// RPC protocol violations and failures
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key has no record. For endpoint-set reads this is
    /// not an error: the service has zero instances.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The lease backing a record is gone (TTL lapsed or evicted); the
    /// caller must re-insert instead of refreshing.
    #[error("lease expired or missing for key: {0}")]
    LeaseNotFound(String),

    /// The watch cursor was invalidated (history compacted away); the
    /// watch must be re-established from scratch.
    #[error("watch history lost: {0}")]
    WatchExpired(String),

    /// Malformed instance record in the store
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// Transport or server-side etcd failure
    #[error("store backend error: {0}")]
    Backend(#[from] Box<etcd_client::Error>),

    /// The watch event stream ended unexpectedly
    #[error("watch stream closed for prefix {0}")]
    WatchClosed(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::LeaseNotFound(_))
    }

    pub fn is_watch_expired(&self) -> bool {
        matches!(self, StoreError::WatchExpired(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Resolve request carried no service specs
    #[error("no service spec found")]
    EmptyServiceList,

    /// Peer address missing from the connection context
    #[error("failed to get peer client info from connection")]
    MissingPeerInfo,

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

impl From<etcd_client::Error> for Error {
    fn from(err: etcd_client::Error) -> Self {
        Error::Store(StoreError::Backend(Box::new(err)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(StoreError::Serde(err))
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::Rpc(RpcError::TaskFailed(err))
    }
}
