//! The service registry (hub): owns the mapping from service identity
//! to its live endpoint set and subscribed observers, mirrors the
//! backing store through watch loops, and fans updates out to
//! subscribers.
//!
//! Locking is fine-grained: the service table is a sharded map held
//! briefly for lookup or insert, each service object guards its own
//! endpoint map and observer list, and the graph key set has its own
//! lock. Updates to one service never block operations on another.

use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::DashSet;
use futures::StreamExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::endpoints::diff_endpoints;
use super::endpoints::full_endpoints;
use super::endpoints::spec_label;
use super::endpoints::EndpointMap;
use super::endpoints::EndpointsUpdate;
use super::graph::ServiceGraph;
use super::observer::ClientObserver;
use crate::constants::CHAN_CAP_MULTIPLIER;
use crate::constants::GRAPH_REFRESH_THROTTLE;
use crate::constants::GRAPH_WRITE_RETRIES;
use crate::constants::WATCH_RETRY_BACKOFF;
use crate::metrics::ADD_OBSERVER_GAUGE;
use crate::metrics::REMOVE_OBSERVER_GAUGE;
use crate::proto::discovery::ResolveRequest;
use crate::proto::discovery::ServiceSpec;
use crate::store::keys;
use crate::store::EndpointStore;
use crate::store::StoreEvent;
use crate::utils::time::unix_timestamp;
use crate::GraphConfig;
use crate::RegistryConfig;
use crate::Result;

/// Per-service mutable record owned exclusively by the registry.
/// Created on first subscription or first report, never destroyed.
pub(crate) struct ServiceObject {
    spec: ServiceSpec,
    endpoints: RwLock<EndpointMap>,
    observers: RwLock<Vec<Arc<ClientObserver>>>,
    rectifier: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceObject {
    fn new(spec: ServiceSpec, endpoints: EndpointMap) -> Self {
        Self {
            spec,
            endpoints: RwLock::new(endpoints),
            observers: RwLock::new(Vec::new()),
            rectifier: Mutex::new(None),
        }
    }

}

/// The hub. Constructed once at startup and injected into the RPC
/// handlers and watch tasks.
pub struct Registry {
    store: Arc<dyn EndpointStore>,
    services: DashMap<String, Arc<ServiceObject>>,
    lameduck: DashSet<String>,
    graph_keys: Mutex<HashSet<String>>,
    next_update_id: AtomicI64,
    registry_config: RegistryConfig,
    graph_config: GraphConfig,
}

impl Registry {
    pub fn new(store: Arc<dyn EndpointStore>, registry_config: RegistryConfig, graph_config: GraphConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            services: DashMap::new(),
            lameduck: DashSet::new(),
            graph_keys: Mutex::new(HashSet::new()),
            next_update_id: AtomicI64::new(0),
            registry_config,
            graph_config,
        })
    }

    /// Starts the long-running watch tasks: the endpoints watcher, the
    /// lame-duck watcher, and the graph marker refresher. All exit when
    /// the shutdown signal fires.
    pub fn spawn_watchers(self: &Arc<Self>, shutdown: watch::Receiver<()>) {
        tokio::spawn(Arc::clone(self).run_endpoints_watcher(shutdown.clone()));
        tokio::spawn(Arc::clone(self).run_lameduck_watcher(shutdown.clone()));
        tokio::spawn(Arc::clone(self).run_graph_refresher(shutdown));
    }

    fn next_update_id(&self) -> i64 {
        self.next_update_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    //-------------------------------------------------------------------------
    // Observer registration

    /// Registers an observer for each of the given specs on behalf of
    /// `client_addr` and returns the shared delivery queue, after
    /// enqueuing an initial diff-against-empty update per spec. On a
    /// store fetch error every observer attached so far is rolled back;
    /// no partial subscription state is retained.
    pub async fn add_observer(
        self: &Arc<Self>,
        specs: &[ServiceSpec],
        client_addr: &str,
    ) -> Result<mpsc::Receiver<EndpointsUpdate>> {
        let (tx, rx) = mpsc::channel(CHAN_CAP_MULTIPLIER * specs.len().max(1));
        let mut attached: Vec<(Arc<ServiceObject>, Arc<ClientObserver>)> = Vec::new();

        for spec in specs {
            debug!(
                "Resolve service {} on port name {:?} from client {}",
                spec_label(spec),
                spec.port_name,
                client_addr
            );
            ADD_OBSERVER_GAUGE.with_label_values(&[&spec_label(spec)]).inc();

            let snapshot = match self.store.fetch_snapshot(spec).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    for (so, observer) in &attached {
                        self.detach_observer(so, observer);
                    }
                    return Err(e.into());
                }
            };

            let key = keys::service_key(&spec.namespace, &spec.service_name);
            let so = self.service_object(&key, spec, &snapshot);

            let update = EndpointsUpdate {
                id: self.next_update_id(),
                endpoints: diff_endpoints(spec, &EndpointMap::new(), &snapshot),
            };
            // Capacity covers one initial update per spec, so this only
            // fails if the receiver is already gone.
            if tx.try_send(update).is_err() {
                warn!("Initial update for {} not delivered", spec_label(spec));
            }

            let observer = Arc::new(ClientObserver::new(spec.clone(), client_addr.to_string(), tx.clone()));
            self.attach_observer(&so, Arc::clone(&observer));
            attached.push((so, observer));
        }

        Ok(rx)
    }

    /// Removes every observer for `client_addr` across the given specs,
    /// duplicates included, and releases their close signals.
    pub fn remove_observer(self: &Arc<Self>, specs: &[ServiceSpec], client_addr: &str) {
        for spec in specs {
            REMOVE_OBSERVER_GAUGE.with_label_values(&[&spec_label(spec)]).inc();

            let key = keys::service_key(&spec.namespace, &spec.service_name);
            let Some(so) = self.services.get(&key).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };

            so.observers.write().retain(|observer| {
                if observer.matches(spec, client_addr) {
                    observer.close();
                    false
                } else {
                    true
                }
            });
            self.sync_rectifier(&so);
        }
    }

    fn service_object(self: &Arc<Self>, key: &str, spec: &ServiceSpec, snapshot: &EndpointMap) -> Arc<ServiceObject> {
        if let Some(so) = self.services.get(key) {
            return Arc::clone(so.value());
        }
        let so = Arc::new(ServiceObject::new(spec.clone(), snapshot.clone()));
        Arc::clone(
            self.services
                .entry(key.to_string())
                .or_insert(so)
                .value(),
        )
    }

    fn attach_observer(self: &Arc<Self>, so: &Arc<ServiceObject>, observer: Arc<ClientObserver>) {
        so.observers.write().push(observer);
        self.sync_rectifier(so);
    }

    fn detach_observer(self: &Arc<Self>, so: &Arc<ServiceObject>, observer: &Arc<ClientObserver>) {
        observer.close();
        so.observers.write().retain(|existing| !Arc::ptr_eq(existing, observer));
        self.sync_rectifier(so);
    }

    /// Reconciles the rectifier task with the current observer count:
    /// running while the service has observers, stopped once it drains.
    /// The decision is made under the rectifier lock so a concurrent
    /// attach and detach cannot leave a task running for a drained
    /// service.
    fn sync_rectifier(self: &Arc<Self>, so: &Arc<ServiceObject>) {
        let mut rectifier = so.rectifier.lock();
        let has_observers = !so.observers.read().is_empty();

        if has_observers && rectifier.is_none() {
            let registry = Arc::clone(self);
            let service_key = keys::service_key(&so.spec.namespace, &so.spec.service_name);
            *rectifier = Some(tokio::spawn(async move {
                let mut ticker = interval(registry.registry_config.auto_rectify_interval());
                // The first tick fires immediately; skip it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    debug!("Automatic endpoints rectification for {}.", service_key);
                    // Force: the healing push goes out even when the
                    // snapshot is unchanged.
                    registry.update_endpoints(&service_key, true).await;
                }
            }));
        } else if !has_observers {
            if let Some(handle) = rectifier.take() {
                handle.abort();
            }
        }
    }

    //-------------------------------------------------------------------------
    // Heartbeat ingestion

    /// Unconditionally (re)creates the store record for one instance
    /// with a fresh TTL. Used for first-heartbeat registration so the
    /// weight is correctly rewritten even if a stale record lingered.
    pub async fn insert_endpoint(&self, spec: &ServiceSpec, host: &str, port: i32, weight: i32) -> Result<()> {
        self.store
            .insert_instance(spec, host, port, weight)
            .await
            .map_err(Into::into)
    }

    /// Refreshes the TTL of an existing record, falling back to a full
    /// insert when the record expired or was evicted.
    pub async fn upsert_endpoint(&self, spec: &ServiceSpec, host: &str, port: i32, weight: i32) -> Result<()> {
        match self.store.refresh_instance(spec, host, port).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => self
                .store
                .insert_instance(spec, host, port, weight)
                .await
                .map_err(Into::into),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `host:port` is currently draining; its heartbeats are
    /// swallowed so the store record expires.
    pub fn is_lameduck(&self, host_port: &str) -> bool {
        self.lameduck.contains(host_port)
    }

    /// Replaces the lame-duck set wholesale, as done when a watch is
    /// (re)established.
    pub(crate) fn reset_lameduck(&self, entries: HashSet<String>) {
        self.lameduck.clear();
        for entry in entries {
            self.lameduck.insert(entry);
        }
    }

    //-------------------------------------------------------------------------
    // Dependency graph markers

    /// Best-effort record of "caller depends on callee". Never blocks
    /// or fails the caller.
    pub async fn track_service_graph(&self, req: &ResolveRequest, callee: &ServiceSpec) {
        debug!(
            "TrackServiceGraph {}|{} --> {}",
            req.caller_service_id,
            req.caller_service_name,
            spec_label(callee)
        );

        let graph_key = keys::graph_key(&callee.namespace, &callee.service_name, &req.caller_service_name);
        self.graph_keys.lock().insert(graph_key.clone());
        self.write_graph_marker(&graph_key).await;
    }

    /// Stops refreshing the marker; the store TTL expires it.
    pub fn untrack_service_graph(&self, req: &ResolveRequest, callee: &ServiceSpec) {
        debug!(
            "UntrackServiceGraph {}|{} --> {}",
            req.caller_service_id,
            req.caller_service_name,
            spec_label(callee)
        );

        let graph_key = keys::graph_key(&callee.namespace, &callee.service_name, &req.caller_service_name);
        self.graph_keys.lock().remove(&graph_key);
    }

    async fn write_graph_marker(&self, graph_key: &str) {
        let timestamp = unix_timestamp();
        for attempt in 1..=GRAPH_WRITE_RETRIES {
            match self.store.put_graph_marker(graph_key, timestamp).await {
                Ok(()) => return,
                Err(e) => {
                    if attempt == GRAPH_WRITE_RETRIES {
                        warn!("Save service graph key {} failed: {:?}", graph_key, e);
                    }
                }
            }
        }
        debug!(
            "Failed to save service graph key {} for {} times",
            graph_key, GRAPH_WRITE_RETRIES
        );
    }

    /// Rebuilds the caller→callee dependency graph from the current
    /// graph markers. Read by introspection tooling.
    pub async fn build_graph(&self) -> Result<ServiceGraph> {
        ServiceGraph::rebuild(self.store.as_ref()).await
    }

    //-------------------------------------------------------------------------
    // Watch loops and fanout

    #[cfg(test)]
    pub(crate) fn observer_count(&self, spec: &ServiceSpec) -> usize {
        let key = keys::service_key(&spec.namespace, &spec.service_name);
        self.services
            .get(&key)
            .map(|so| so.observers.read().len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn rectifier_running(&self, spec: &ServiceSpec) -> bool {
        let key = keys::service_key(&spec.namespace, &spec.service_name);
        self.services
            .get(&key)
            .map(|so| so.rectifier.lock().is_some())
            .unwrap_or(false)
    }

    async fn run_endpoints_watcher(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        'watch: loop {
            let mut events = match self.store.watch_endpoints().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to establish endpoints watch: {:?}", e);
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = sleep(WATCH_RETRY_BACKOFF) => continue 'watch,
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    event = events.next() => match event {
                        Some(Ok(event)) => self.handle_endpoint_event(&event).await,
                        Some(Err(e)) if e.is_watch_expired() => {
                            error!("Abandon endpoints watcher, {:?}", e);
                            continue 'watch;
                        }
                        Some(Err(e)) => {
                            error!("Failed to get next endpoints watch event, {:?}", e);
                            sleep(WATCH_RETRY_BACKOFF).await;
                        }
                        None => {
                            warn!("Endpoints watch stream closed, re-establishing");
                            continue 'watch;
                        }
                    }
                }
            }
        }
    }

    async fn handle_endpoint_event(&self, event: &StoreEvent) {
        let Some(service_key) = keys::parent_service_key(event.key()) else {
            warn!("Unexpected key {} under endpoints watch, ignore.", event.key());
            return;
        };
        self.update_endpoints(&service_key, false).await;
    }

    /// Recomputes the live snapshot of one service and fans the full
    /// new state out to every current observer. Unless `force` is set,
    /// a snapshot identical to the last one seen is not fanned out;
    /// TTL-refresh puts fire watch events without changing membership.
    pub(crate) async fn update_endpoints(&self, service_key: &str, force: bool) {
        let Some(so) = self.services.get(service_key).map(|entry| Arc::clone(entry.value())) else {
            debug!("No service object for key {:?}", service_key);
            return;
        };

        let snapshot = match self.store.fetch_snapshot(&so.spec).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to fetch endpoints for service {}: {:?}", spec_label(&so.spec), e);
                return;
            }
        };

        self.apply_endpoints(&so, snapshot, force);
    }

    fn apply_endpoints(&self, so: &Arc<ServiceObject>, snapshot: EndpointMap, force: bool) {
        let full = full_endpoints(&so.spec, &snapshot);
        let observers: Vec<Arc<ClientObserver>> = {
            let mut endpoints = so.endpoints.write();
            if !force && *endpoints == snapshot {
                return;
            }
            *endpoints = snapshot;
            so.observers.read().clone()
        };

        // A transiently empty read must not wipe client endpoint lists;
        // the next change or the rectify push converges them.
        if full.inst_endpoints.is_empty() {
            return;
        }

        let id = self.next_update_id();
        let notify_timeout = self.registry_config.notify_timeout();
        for observer in observers {
            if observer.is_closed() {
                continue;
            }
            let update = EndpointsUpdate {
                id,
                endpoints: full.clone(),
            };
            tokio::spawn(async move {
                observer.notify(update, notify_timeout).await;
            });
        }
    }

    async fn run_lameduck_watcher(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        // Load the current lame-duck set before watching for changes.
        match self.store.fetch_lameduck_set().await {
            Ok(entries) => self.reset_lameduck(entries),
            Err(e) => error!("Failed to load lameduck instances: {:?}", e),
        }

        'watch: loop {
            let mut events = match self.store.watch_lameduck().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to establish lameduck watch: {:?}", e);
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = sleep(WATCH_RETRY_BACKOFF) => continue 'watch,
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    event = events.next() => match event {
                        Some(Ok(event)) => self.handle_lameduck_event(&event),
                        Some(Err(e)) if e.is_watch_expired() => {
                            error!("Abandon lameduck watcher, {:?}", e);
                            continue 'watch;
                        }
                        Some(Err(e)) => {
                            error!("Failed to get next lameduck watch event, {:?}", e);
                            sleep(WATCH_RETRY_BACKOFF).await;
                        }
                        None => {
                            warn!("Lameduck watch stream closed, re-establishing");
                            continue 'watch;
                        }
                    }
                }
            }
        }
    }

    fn handle_lameduck_event(&self, event: &StoreEvent) {
        match event {
            StoreEvent::KeyPut(key) => {
                if let Some(entry) = keys::lameduck_entry(key) {
                    info!("Instance {} entered lame duck mode", entry);
                    self.lameduck.insert(entry);
                }
            }
            StoreEvent::KeyDeleted(key) => {
                if let Some(entry) = keys::lameduck_entry(key) {
                    info!("Instance {} left lame duck mode", entry);
                    self.lameduck.remove(&entry);
                }
            }
        }
    }

    async fn run_graph_refresher(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        let mut ticker = interval(self.graph_config.refresh_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }

            let graph_keys: Vec<String> = self.graph_keys.lock().iter().cloned().collect();
            let timestamp = unix_timestamp();
            for graph_key in graph_keys {
                if let Err(e) = self.store.put_graph_marker(&graph_key, timestamp).await {
                    warn!("Save service graph key {} err: {:?}", graph_key, e);
                }
                // Throttle the refresh traffic to the store.
                sleep(GRAPH_REFRESH_THROTTLE).await;
            }
        }
    }
}
