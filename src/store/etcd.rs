//! Etcd store backend. Instance records are JSON values under the
//! endpoints prefix, each bound to its own lease so a crashed instance
//! disappears after the TTL; heartbeats translate into lease
//! keep-alives. Graph markers carry their own longer-lived leases.
//!
//! A canceled or compacted watch surfaces as
//! [`StoreError::WatchExpired`] so the hub re-establishes the watch
//! instead of treating it as a transient event error.

use std::collections::HashMap;
use std::collections::HashSet;

use etcd_client::Client;
use etcd_client::ConnectOptions;
use etcd_client::EventType;
use etcd_client::GetOptions;
use etcd_client::PutOptions;
use etcd_client::WatchOptions;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use super::keys;
use super::EndpointStore;
use super::EventStream;
use super::InstanceRecord;
use super::StoreEvent;
use super::StoreResult;
use crate::hub::EndpointMap;
use crate::proto::discovery::ServiceSpec;
use crate::GraphConfig;
use crate::StoreConfig;
use crate::StoreError;

pub struct EtcdStore {
    client: Client,
    endpoint_ttl_secs: i64,
    graph_ttl_secs: i64,
    /// Endpoint key to the lease its record is bound to.
    endpoint_leases: Mutex<HashMap<String, i64>>,
    /// Graph marker key to its current lease.
    graph_leases: Mutex<HashMap<String, i64>>,
}

impl EtcdStore {
    pub async fn connect(store_config: &StoreConfig, graph_config: &GraphConfig) -> StoreResult<Self> {
        let options = ConnectOptions::new().with_connect_timeout(store_config.connect_timeout());
        let client = Client::connect(&store_config.endpoints, Some(options)).await?;
        debug!("Connected to etcd at {:?}", store_config.endpoints);

        Ok(Self {
            client,
            endpoint_ttl_secs: store_config.endpoint_key_ttl_secs as i64,
            graph_ttl_secs: graph_config.key_ttl_secs as i64,
            endpoint_leases: Mutex::new(HashMap::new()),
            graph_leases: Mutex::new(HashMap::new()),
        })
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<EventStream> {
        let (watcher, watch_stream) = self
            .client
            .watch_client()
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        // The watcher handle rides inside the closure so the server-side
        // watch stays open for the stream's whole lifetime.
        let events = watch_stream.flat_map(move |message| {
            let _ = &watcher;
            let results: Vec<StoreResult<StoreEvent>> = match message {
                Ok(response) => {
                    if response.canceled() || response.compact_revision() > 0 {
                        vec![Err(StoreError::WatchExpired(format!(
                            "watch canceled, compact revision {}",
                            response.compact_revision()
                        )))]
                    } else {
                        response
                            .events()
                            .iter()
                            .filter_map(|event| {
                                let key = event.kv().and_then(|kv| kv.key_str().ok())?.to_string();
                                match event.event_type() {
                                    EventType::Put => Some(Ok(StoreEvent::KeyPut(key))),
                                    EventType::Delete => Some(Ok(StoreEvent::KeyDeleted(key))),
                                }
                            })
                            .collect()
                    }
                }
                Err(e) => vec![Err(StoreError::from(e))],
            };
            stream::iter(results)
        });

        Ok(Box::pin(events))
    }

    /// Sends one keep-alive on the lease and waits for the server's
    /// verdict. A zero TTL in the response means the lease is gone.
    async fn keep_lease_alive(&self, lease_id: i64) -> StoreResult<bool> {
        let (mut keeper, mut responses) = self.client.lease_client().keep_alive(lease_id).await?;
        keeper.keep_alive().await?;
        match responses.message().await? {
            Some(response) => Ok(response.ttl() > 0),
            None => Ok(false),
        }
    }
}

#[tonic::async_trait]
impl EndpointStore for EtcdStore {
    async fn fetch_snapshot(&self, spec: &ServiceSpec) -> StoreResult<EndpointMap> {
        let prefix = format!("{}/", keys::service_key(&spec.namespace, &spec.service_name));
        let response = self
            .client
            .kv_client()
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut map = EndpointMap::new();
        for kv in response.kvs() {
            match serde_json::from_slice::<InstanceRecord>(kv.value()) {
                Ok(record) => record.apply_to(spec, &mut map),
                // A malformed record must not take the whole snapshot down.
                Err(e) => warn!("Skipping malformed instance record under {:?}: {}", prefix, e),
            }
        }
        Ok(map)
    }

    async fn insert_instance(&self, spec: &ServiceSpec, host: &str, port: i32, weight: i32) -> StoreResult<()> {
        let key = keys::endpoint_key(&spec.namespace, &spec.service_name, host, port);
        let record = InstanceRecord::new(spec, host, port, weight);
        let value = serde_json::to_string(&record)?;

        let lease = self.client.lease_client().grant(self.endpoint_ttl_secs, None).await?;
        self.client
            .kv_client()
            .put(key.as_str(), value, Some(PutOptions::new().with_lease(lease.id())))
            .await?;

        self.endpoint_leases.lock().insert(key, lease.id());
        Ok(())
    }

    async fn refresh_instance(&self, spec: &ServiceSpec, host: &str, port: i32) -> StoreResult<()> {
        let key = keys::endpoint_key(&spec.namespace, &spec.service_name, host, port);
        let lease_id = self.endpoint_leases.lock().get(&key).copied();
        let Some(lease_id) = lease_id else {
            return Err(StoreError::LeaseNotFound(key));
        };

        if self.keep_lease_alive(lease_id).await? {
            Ok(())
        } else {
            self.endpoint_leases.lock().remove(&key);
            Err(StoreError::LeaseNotFound(key))
        }
    }

    async fn watch_endpoints(&self) -> StoreResult<EventStream> {
        self.watch_prefix(keys::ENDPOINTS_KEY_PREFIX).await
    }

    async fn fetch_lameduck_set(&self) -> StoreResult<HashSet<String>> {
        let response = self
            .client
            .kv_client()
            .get(
                keys::LAMEDUCK_KEY_PREFIX,
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await?;

        Ok(response
            .kvs()
            .iter()
            .filter_map(|kv| kv.key_str().ok())
            .filter_map(keys::lameduck_entry)
            .collect())
    }

    async fn watch_lameduck(&self) -> StoreResult<EventStream> {
        self.watch_prefix(keys::LAMEDUCK_KEY_PREFIX).await
    }

    async fn put_graph_marker(&self, key: &str, timestamp: i64) -> StoreResult<()> {
        let lease = self.client.lease_client().grant(self.graph_ttl_secs, None).await?;
        self.client
            .kv_client()
            .put(key, timestamp.to_string(), Some(PutOptions::new().with_lease(lease.id())))
            .await?;

        let previous = self.graph_leases.lock().insert(key.to_string(), lease.id());
        if let Some(previous) = previous {
            // The old lease no longer backs any key; release it early.
            if let Err(e) = self.client.lease_client().revoke(previous).await {
                debug!("Failed to revoke superseded lease {}: {}", previous, e);
            }
        }
        Ok(())
    }

    async fn scan_graph_markers(&self) -> StoreResult<Vec<(String, i64)>> {
        let response = self
            .client
            .kv_client()
            .get(keys::GRAPH_KEY_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;

        Ok(response
            .kvs()
            .iter()
            .filter_map(|kv| {
                let key = kv.key_str().ok()?.to_string();
                let timestamp = kv.value_str().ok()?.parse::<i64>().ok()?;
                Some((key, timestamp))
            })
            .collect())
    }
}
