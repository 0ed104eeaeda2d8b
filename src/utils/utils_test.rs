use super::net::host_port;
use super::net::peer_host;
use super::time::unix_timestamp;

#[test]
fn test_peer_host_ipv4() {
    assert_eq!(peer_host("192.168.0.1:33254"), "192.168.0.1");
}

#[test]
fn test_peer_host_ipv6() {
    assert_eq!(peer_host("[::1]:33254"), "[::1]");
}

#[test]
fn test_peer_host_without_port() {
    assert_eq!(peer_host("192.168.0.1"), "192.168.0.1");
}

#[test]
fn test_host_port() {
    assert_eq!(host_port("10.0.0.1", 8080), "10.0.0.1:8080");
}

#[test]
fn test_unix_timestamp_is_positive() {
    assert!(unix_timestamp() > 1_500_000_000);
}
