use super::keys::*;

#[test]
fn test_service_key() {
    assert_eq!(
        service_key("default", "service1"),
        "/registry/services/endpoints/default/service1"
    );
}

#[test]
fn test_endpoint_key() {
    assert_eq!(
        endpoint_key("default", "service1", "192.168.1.1", 8080),
        "/registry/services/endpoints/default/service1/192.168.1.1_8080"
    );
}

#[test]
fn test_weight_key() {
    assert_eq!(weight_key("192.168.1.1", 8080), "192.168.1.1_8080_weight");
}

#[test]
fn test_graph_key() {
    assert_eq!(
        graph_key("default", "billing", "web"),
        "/registry/services/graph/default/billing/clients/web/timestamp"
    );
}

#[test]
fn test_parent_service_key() {
    let key = endpoint_key("default", "service1", "192.168.1.1", 8080);
    assert_eq!(
        parent_service_key(&key).unwrap(),
        service_key("default", "service1")
    );
    assert!(parent_service_key("/registry/services/lameducks/svc/1.2.3.4:80").is_none());
}

#[test]
fn test_lameduck_entry() {
    assert_eq!(
        lameduck_entry("/registry/services/lameducks/service1/10.0.0.1:8080").unwrap(),
        "10.0.0.1:8080"
    );
    assert!(lameduck_entry("/registry/services/lameducks/service1").is_none());
    assert!(lameduck_entry("/registry/services/endpoints/ns/svc/1.2.3.4_80").is_none());
}

#[test]
fn test_parse_graph_key() {
    let (callee, caller) = parse_graph_key(&graph_key("default", "billing", "web")).unwrap();
    assert_eq!(callee, "billing");
    assert_eq!(caller, "web");

    assert!(parse_graph_key("/registry/services/graph/default/billing").is_none());
    assert!(parse_graph_key("/registry/services/graph/default/billing/clients/web").is_none());
}
