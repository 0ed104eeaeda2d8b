//! The store adapter: everything the registry needs from the backing
//! key-value store, behind one capability trait so the hub depends only
//! on the interface. Two implementations are selected by configuration:
//! [`EtcdStore`] against the distributed store of record, and
//! [`MemoryStore`] for tests and local development.

pub mod keys;
mod record;
pub use record::*;

mod etcd;
mod memory;
pub use etcd::*;
pub use memory::*;

#[cfg(test)]
mod keys_test;


#[cfg(test)]
mod memory_test;

//-----------------------------------------------------------------------------
// Capability trait the registry is written against.

use std::collections::HashSet;
use std::pin::Pin;

use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::hub::EndpointMap;
use crate::proto::discovery::ServiceSpec;
use crate::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    KeyPut(String),
    KeyDeleted(String),
}

impl StoreEvent {
    pub fn key(&self) -> &str {
        match self {
            StoreEvent::KeyPut(key) => key,
            StoreEvent::KeyDeleted(key) => key,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = StoreResult<StoreEvent>> + Send>>;

#[cfg_attr(test, automock)]
#[tonic::async_trait]
pub trait EndpointStore: Send + Sync + 'static {
    /// Reads the live endpoint set of one service. A missing key means
    /// the service has zero instances, never an error.
    async fn fetch_snapshot(&self, spec: &ServiceSpec) -> StoreResult<EndpointMap>;

    /// Unconditionally (re)writes one instance record with a fresh TTL.
    async fn insert_instance(&self, spec: &ServiceSpec, host: &str, port: i32, weight: i32) -> StoreResult<()>;

    /// Refreshes the TTL of an existing record. Returns
    /// [`StoreError::LeaseNotFound`] when the record is gone, in which
    /// case the caller falls back to a full insert.
    async fn refresh_instance(&self, spec: &ServiceSpec, host: &str, port: i32) -> StoreResult<()>;

    /// Opens a watch over the endpoints namespace.
    async fn watch_endpoints(&self) -> StoreResult<EventStream>;

    /// Reads the current set of lame-duck `host:port` entries.
    async fn fetch_lameduck_set(&self) -> StoreResult<HashSet<String>>;

    /// Opens a watch over the lame-duck namespace.
    async fn watch_lameduck(&self) -> StoreResult<EventStream>;

    /// Writes one dependency graph marker with the graph TTL.
    async fn put_graph_marker(&self, key: &str, timestamp: i64) -> StoreResult<()>;

    /// Scans all graph markers, returning `(key, timestamp)` pairs.
    async fn scan_graph_markers(&self) -> StoreResult<Vec<(String, i64)>>;
}
