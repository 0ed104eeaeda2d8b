//! In-memory store backend. Keeps the exact key layout of the etcd
//! backend so the registry exercises identical code paths; records do
//! not expire on their own, callers drive expiry explicitly. Selected
//! by configuration for tests and local development.

use std::collections::BTreeMap;
use std::collections::HashSet;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::keys;
use super::EndpointStore;
use super::EventStream;
use super::InstanceRecord;
use super::StoreEvent;
use super::StoreResult;
use crate::hub::EndpointMap;
use crate::proto::discovery::ServiceSpec;
use crate::StoreError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    fn put(&self, key: String, value: String) {
        self.entries.lock().insert(key.clone(), value);
        let _ = self.events.send(StoreEvent::KeyPut(key));
    }

    /// Drops a key and emits a delete event, exactly as a TTL expiry in
    /// the backing store would.
    pub fn expire_key(&self, key: &str) {
        if self.entries.lock().remove(key).is_some() {
            let _ = self.events.send(StoreEvent::KeyDeleted(key.to_string()));
        }
    }

    /// Writes a lame-duck marker for `host:port` of the given service.
    pub fn put_lameduck(&self, service_name: &str, host_port: &str) {
        let key = format!("{}/{}/{}", keys::LAMEDUCK_KEY_PREFIX, service_name, host_port);
        self.put(key, String::new());
    }

    /// Removes the lame-duck marker for `host:port`.
    pub fn remove_lameduck(&self, service_name: &str, host_port: &str) {
        let key = format!("{}/{}/{}", keys::LAMEDUCK_KEY_PREFIX, service_name, host_port);
        self.expire_key(&key);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn watch_prefix(&self, prefix: &'static str) -> EventStream {
        let events = BroadcastStream::new(self.events.subscribe()).filter_map(move |event| async move {
            match event {
                Ok(event) if event.key().starts_with(prefix) => Some(Ok(event)),
                Ok(_) => None,
                Err(_) => Some(Err(StoreError::WatchExpired(
                    "memory event stream lagged".to_string(),
                ))),
            }
        });
        Box::pin(events)
    }

    fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[tonic::async_trait]
impl EndpointStore for MemoryStore {
    async fn fetch_snapshot(&self, spec: &ServiceSpec) -> StoreResult<EndpointMap> {
        let prefix = format!("{}/", keys::service_key(&spec.namespace, &spec.service_name));
        let mut map = EndpointMap::new();
        let entries = self.entries.lock();
        for (key, value) in entries.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let record: InstanceRecord = serde_json::from_str(value)?;
            record.apply_to(spec, &mut map);
        }
        Ok(map)
    }

    async fn insert_instance(&self, spec: &ServiceSpec, host: &str, port: i32, weight: i32) -> StoreResult<()> {
        let key = keys::endpoint_key(&spec.namespace, &spec.service_name, host, port);
        let record = InstanceRecord::new(spec, host, port, weight);
        self.put(key, serde_json::to_string(&record)?);
        Ok(())
    }

    async fn refresh_instance(&self, spec: &ServiceSpec, host: &str, port: i32) -> StoreResult<()> {
        let key = keys::endpoint_key(&spec.namespace, &spec.service_name, host, port);
        if self.entries.lock().contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(key))
        }
    }

    async fn watch_endpoints(&self) -> StoreResult<EventStream> {
        Ok(self.watch_prefix(keys::ENDPOINTS_KEY_PREFIX))
    }

    async fn fetch_lameduck_set(&self) -> StoreResult<HashSet<String>> {
        Ok(self
            .keys_under(keys::LAMEDUCK_KEY_PREFIX)
            .iter()
            .filter_map(|key| keys::lameduck_entry(key))
            .collect())
    }

    async fn watch_lameduck(&self) -> StoreResult<EventStream> {
        Ok(self.watch_prefix(keys::LAMEDUCK_KEY_PREFIX))
    }

    async fn put_graph_marker(&self, key: &str, timestamp: i64) -> StoreResult<()> {
        self.put(key.to_string(), timestamp.to_string());
        Ok(())
    }

    async fn scan_graph_markers(&self) -> StoreResult<Vec<(String, i64)>> {
        let entries = self.entries.lock();
        Ok(entries
            .range(keys::GRAPH_KEY_PREFIX.to_string()..)
            .take_while(|(key, _)| key.starts_with(keys::GRAPH_KEY_PREFIX))
            .filter_map(|(key, value)| value.parse::<i64>().ok().map(|ts| (key.clone(), ts)))
            .collect())
    }
}
