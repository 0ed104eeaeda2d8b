use futures::StreamExt;

use super::keys;
use super::EndpointStore;
use super::MemoryStore;
use super::StoreEvent;
use crate::proto::discovery::ServiceSpec;

fn spec() -> ServiceSpec {
    ServiceSpec {
        namespace: "default".to_string(),
        service_name: "service1".to_string(),
        port_name: "port".to_string(),
    }
}

#[tokio::test]
async fn test_insert_then_snapshot() {
    let store = MemoryStore::new();
    store.insert_instance(&spec(), "192.168.1.1", 8080, 3).await.unwrap();
    store.insert_instance(&spec(), "192.168.1.2", 8080, 0).await.unwrap();

    let snapshot = store.fetch_snapshot(&spec()).await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["192.168.1.1:8080"].weight, 3);
    assert_eq!(snapshot["192.168.1.2:8080"].weight, 0);
}

#[tokio::test]
async fn test_snapshot_of_unknown_service_is_empty() {
    let store = MemoryStore::new();
    let snapshot = store.fetch_snapshot(&spec()).await.unwrap();
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn test_snapshot_does_not_leak_sibling_services() {
    let store = MemoryStore::new();
    let mut other = spec();
    other.service_name = "service10".to_string();

    store.insert_instance(&spec(), "192.168.1.1", 8080, 0).await.unwrap();
    store.insert_instance(&other, "192.168.1.9", 8080, 0).await.unwrap();

    let snapshot = store.fetch_snapshot(&spec()).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.contains_key("192.168.1.1:8080"));
}

#[tokio::test]
async fn test_refresh_missing_instance_reports_lease_gone() {
    let store = MemoryStore::new();
    let err = store.refresh_instance(&spec(), "192.168.1.1", 8080).await.unwrap_err();
    assert!(err.is_not_found());

    store.insert_instance(&spec(), "192.168.1.1", 8080, 0).await.unwrap();
    store.refresh_instance(&spec(), "192.168.1.1", 8080).await.unwrap();
}

#[tokio::test]
async fn test_watch_sees_puts_and_expiry() {
    let store = MemoryStore::new();
    let mut events = store.watch_endpoints().await.unwrap();

    store.insert_instance(&spec(), "192.168.1.1", 8080, 0).await.unwrap();
    let key = keys::endpoint_key("default", "service1", "192.168.1.1", 8080);
    store.expire_key(&key);

    assert_eq!(events.next().await.unwrap().unwrap(), StoreEvent::KeyPut(key.clone()));
    assert_eq!(events.next().await.unwrap().unwrap(), StoreEvent::KeyDeleted(key));
}

#[tokio::test]
async fn test_watch_filters_other_prefixes() {
    let store = MemoryStore::new();
    let mut events = store.watch_lameduck().await.unwrap();

    store.insert_instance(&spec(), "192.168.1.1", 8080, 0).await.unwrap();
    store.put_lameduck("service1", "192.168.1.2:8080");

    let event = events.next().await.unwrap().unwrap();
    assert!(event.key().starts_with(keys::LAMEDUCK_KEY_PREFIX));
}

#[tokio::test]
async fn test_lameduck_set() {
    let store = MemoryStore::new();
    store.put_lameduck("service1", "192.168.1.1:8080");
    store.put_lameduck("service2", "192.168.1.2:9090");

    let set = store.fetch_lameduck_set().await.unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.contains("192.168.1.1:8080"));

    store.remove_lameduck("service1", "192.168.1.1:8080");
    let set = store.fetch_lameduck_set().await.unwrap();
    assert!(!set.contains("192.168.1.1:8080"));
}

#[tokio::test]
async fn test_graph_markers_round_trip() {
    let store = MemoryStore::new();
    let key = keys::graph_key("default", "service1", "caller1");
    store.put_graph_marker(&key, 1700000000).await.unwrap();

    let markers = store.scan_graph_markers().await.unwrap();
    assert_eq!(markers, vec![(key, 1700000000)]);
}
