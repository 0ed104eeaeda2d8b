use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tonic::Status;

use super::service::run_report_loop;
use super::service::run_resolve_loop;
use crate::hub::EndpointsUpdate;
use crate::hub::Registry;
use crate::metrics::AUTO_DISCONN_COUNTS;
use crate::proto::discovery::LoadReport;
use crate::proto::discovery::ResolveRequest;
use crate::proto::discovery::ResolveResponse;
use crate::proto::discovery::ServiceEndpoints;
use crate::proto::discovery::ServiceSpec;
use crate::store::EndpointStore;
use crate::store::MemoryStore;
use crate::GraphConfig;
use crate::RegistryConfig;

fn spec(service_name: &str) -> ServiceSpec {
    ServiceSpec {
        namespace: "default".to_string(),
        service_name: service_name.to_string(),
        port_name: "port".to_string(),
    }
}

fn registry_over(store: Arc<MemoryStore>) -> Arc<Registry> {
    Registry::new(store, RegistryConfig::default(), GraphConfig::default())
}

fn report(service_name: &str, port: i32, weight: i32, fixed_host: &str) -> Result<LoadReport, Status> {
    Ok(LoadReport {
        spec: Some(spec(service_name)),
        port,
        weight,
        fixed_host: fixed_host.to_string(),
    })
}

fn update(service_name: &str, id: i64) -> EndpointsUpdate {
    EndpointsUpdate {
        id,
        endpoints: ServiceEndpoints {
            spec: Some(spec(service_name)),
            inst_endpoints: vec![],
        },
    }
}

fn resolve_request(service_name: &str) -> ResolveRequest {
    ResolveRequest {
        caller_service_id: 1001,
        caller_service_name: "caller1".to_string(),
        services: vec![spec(service_name)],
        resolve_full_endpoints: false,
    }
}

async fn drain(rx: &mut mpsc::Receiver<Result<ResolveResponse, Status>>) -> Vec<ResolveResponse> {
    let mut responses = Vec::new();
    while let Some(response) = rx.recv().await {
        responses.push(response.unwrap());
    }
    responses
}

//-----------------------------------------------------------------------------
// ReportLoad

#[tokio::test]
async fn test_first_report_registers_instance() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store.clone());

    let reports = stream::iter(vec![report("service1", 8080, 3, "")]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();

    let snapshot = store.fetch_snapshot(&spec("service1")).await.unwrap();
    assert_eq!(snapshot["192.168.1.1:8080"].weight, 3);
}

#[tokio::test]
async fn test_followup_reports_do_not_rewrite_weight() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store.clone());

    let reports = stream::iter(vec![report("service1", 8080, 3, ""), report("service1", 8080, 9, "")]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();

    // The second heartbeat only refreshes the TTL.
    let snapshot = store.fetch_snapshot(&spec("service1")).await.unwrap();
    assert_eq!(snapshot["192.168.1.1:8080"].weight, 3);
}

#[tokio::test]
async fn test_fixed_host_overrides_peer_address() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store.clone());

    let reports = stream::iter(vec![report("service1", 8080, 0, "10.9.9.9")]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();

    let snapshot = store.fetch_snapshot(&spec("service1")).await.unwrap();
    assert!(snapshot.contains_key("10.9.9.9:8080"));
    assert!(!snapshot.contains_key("192.168.1.1:8080"));
}

#[tokio::test]
async fn test_lameduck_heartbeats_are_swallowed() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store.clone());
    store.put_lameduck("service1", "192.168.1.1:8080");
    load_lameduck(&registry, &store).await;

    let reports = stream::iter(vec![report("service1", 8080, 0, "")]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();

    let snapshot = store.fetch_snapshot(&spec("service1")).await.unwrap();
    assert!(snapshot.is_empty(), "lame-duck heartbeat must not create a record");
}

#[tokio::test]
async fn test_reports_resume_after_lameduck_recovery() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store.clone());
    store.put_lameduck("service1", "192.168.1.1:8080");
    load_lameduck(&registry, &store).await;

    let reports = stream::iter(vec![report("service1", 8080, 4, "")]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();
    assert!(store.fetch_snapshot(&spec("service1")).await.unwrap().is_empty());

    store.remove_lameduck("service1", "192.168.1.1:8080");
    load_lameduck(&registry, &store).await;

    // A follow-up heartbeat finds no record and falls back to insert.
    let reports = stream::iter(vec![report("service1", 8080, 4, "")]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();
    let snapshot = store.fetch_snapshot(&spec("service1")).await.unwrap();
    assert_eq!(snapshot["192.168.1.1:8080"].weight, 4);
}

#[tokio::test]
async fn test_report_without_spec_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store);

    let reports = stream::iter(vec![Ok(LoadReport {
        spec: None,
        port: 8080,
        weight: 0,
        fixed_host: String::new(),
    })]);
    let status = run_report_loop(&registry, "192.168.1.1", reports).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn test_client_stream_error_ends_quietly() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store);

    let reports = stream::iter(vec![
        report("service1", 8080, 0, ""),
        Err(Status::cancelled("client went away")),
    ]);
    run_report_loop(&registry, "192.168.1.1", reports).await.unwrap();
}

/// Syncs the lame-duck set by hand instead of spawning the watch task.
async fn load_lameduck(registry: &Registry, store: &MemoryStore) {
    registry.reset_lameduck(store.fetch_lameduck_set().await.unwrap());
}

//-----------------------------------------------------------------------------
// Resolve

#[tokio::test]
async fn test_resolve_loop_dedups_stale_update_ids() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store);

    let (updates_tx, updates_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel(16);

    for id in [1, 2, 2, 1, 3] {
        updates_tx.send(update("service1", id)).await.unwrap();
    }
    drop(updates_tx);

    run_resolve_loop(
        registry,
        resolve_request("service1"),
        "10.0.0.1:5000".to_string(),
        updates_rx,
        out_tx,
        Duration::from_secs(300),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(drain(&mut out_rx).await.len(), 3);
}

#[tokio::test]
async fn test_resolve_loop_tracks_ids_per_service() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store);

    let (updates_tx, updates_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel(16);

    // A lower id on a different service is not stale.
    updates_tx.send(update("service1", 5)).await.unwrap();
    updates_tx.send(update("service2", 1)).await.unwrap();
    drop(updates_tx);

    run_resolve_loop(
        registry,
        resolve_request("service1"),
        "10.0.0.1:5000".to_string(),
        updates_rx,
        out_tx,
        Duration::from_secs(300),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(drain(&mut out_rx).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_loop_abandons_wedged_client() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store);

    let (updates_tx, updates_rx) = mpsc::channel(16);
    // Capacity one and nobody consuming: the second send wedges.
    let (out_tx, out_rx) = mpsc::channel(1);

    updates_tx.send(update("service1", 1)).await.unwrap();
    updates_tx.send(update("service1", 2)).await.unwrap();

    let task = tokio::spawn(run_resolve_loop(
        registry,
        resolve_request("service1"),
        "10.0.0.1:5000".to_string(),
        updates_rx,
        out_tx,
        Duration::from_secs(300),
        Duration::from_secs(10),
    ));

    timeout(Duration::from_secs(60), task).await.unwrap().unwrap();
    drop(out_rx);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_loop_auto_disconnects() {
    let store = Arc::new(MemoryStore::new());
    let registry = registry_over(store);

    let (updates_tx, updates_rx) = mpsc::channel(16);
    let (out_tx, _out_rx) = mpsc::channel(16);
    let before = AUTO_DISCONN_COUNTS.get();

    let task = tokio::spawn(run_resolve_loop(
        registry,
        resolve_request("service1"),
        "10.0.0.1:5000".to_string(),
        updates_rx,
        out_tx,
        Duration::from_secs(300),
        Duration::from_secs(10),
    ));

    // The loop must end on its own even though updates keep pending.
    timeout(Duration::from_secs(700), task).await.unwrap().unwrap();
    assert!(AUTO_DISCONN_COUNTS.get() > before);
    drop(updates_tx);
}
