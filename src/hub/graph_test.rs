use super::graph::*;
use crate::store::keys;
use crate::store::MockEndpointStore;

fn marker(callee: &str, caller: &str, timestamp: i64) -> (String, i64) {
    (keys::graph_key("default", callee, caller), timestamp)
}

async fn graph_of(markers: Vec<(String, i64)>) -> ServiceGraph {
    let mut store = MockEndpointStore::new();
    store.expect_scan_graph_markers().returning(move || Ok(markers.clone()));
    ServiceGraph::rebuild(&store).await.unwrap()
}

#[tokio::test]
async fn test_rebuild_accumulates_same_generation() {
    let graph = graph_of(vec![
        marker("service-b", "service-a", 100),
        marker("service-c", "service-a", 100),
    ])
    .await;

    let pairs = graph.call_pairs("service-a");
    assert_eq!(pairs.len(), 2);
    assert!(pairs.iter().any(|p| p.callee == "service-b"));
    assert!(pairs.iter().any(|p| p.callee == "service-c"));
}

#[tokio::test]
async fn test_rebuild_newer_generation_supersedes() {
    let graph = graph_of(vec![
        marker("service-b", "service-a", 100),
        marker("service-c", "service-a", 200),
        marker("service-d", "service-a", 150),
    ])
    .await;

    // Only the generation stamped 200 survives; both older markers
    // are purged or ignored.
    let pairs = graph.call_pairs("service-a");
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].callee, "service-c");
    assert_eq!(pairs[0].caller_info.timestamp, 200);
}

#[tokio::test]
async fn test_rebuild_skips_malformed_keys() {
    let graph = graph_of(vec![
        ("/registry/services/graph/default/x".to_string(), 100),
        marker("service-b", "service-a", 100),
    ])
    .await;

    assert_eq!(graph.callers().count(), 1);
}

#[tokio::test]
async fn test_find_roots_and_called_map() {
    let graph = graph_of(vec![
        marker("service-b", "service-a", 100),
        marker("service-c", "service-b", 100),
        marker("service-c", "service-d", 100),
    ])
    .await;

    assert_eq!(graph.find_roots(), vec!["service-a", "service-d"]);

    let called = graph.called_map();
    assert_eq!(called["service-c"], vec!["service-b", "service-d"]);
    assert_eq!(called["service-b"], vec!["service-a"]);
}

#[tokio::test]
async fn test_trace_callees_transitive() {
    let graph = graph_of(vec![
        marker("service-b", "service-a", 100),
        marker("service-c", "service-b", 100),
    ])
    .await;

    let trace = graph.trace_callees("service-a");
    assert_eq!(trace.callees, vec!["service-b", "service-c"]);
    assert!(!trace.cycle_detected);
}

#[tokio::test]
async fn test_trace_callees_terminates_on_cycle() {
    let graph = graph_of(vec![
        marker("service-b", "service-a", 100),
        marker("service-a", "service-b", 100),
    ])
    .await;

    let trace = graph.trace_callees("service-a");
    assert!(trace.cycle_detected);
    assert_eq!(trace.callees, vec!["service-b", "service-a"]);
}

#[tokio::test]
async fn test_diamond_is_not_a_cycle() {
    let graph = graph_of(vec![
        marker("service-b", "service-a", 100),
        marker("service-c", "service-a", 100),
        marker("service-d", "service-b", 100),
        marker("service-d", "service-c", 100),
    ])
    .await;

    let trace = graph.trace_callees("service-a");
    assert!(!trace.cycle_detected);
    assert_eq!(trace.callees.len(), 3);
}
