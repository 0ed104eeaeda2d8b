//! Store key layout. The layout is shared with other replicas and the
//! administrative tooling, so it must be preserved bit-exactly:
//!
//! - endpoints: `/registry/services/endpoints/<ns>/<svc>/<host>_<port>`
//! - weight label: `<host>_<port>_weight` inside the instance record
//! - lame-duck markers: `/registry/services/lameducks/<svc>/<host>:<port>`
//! - graph markers:
//!   `/registry/services/graph/<ns>/<svc>/clients/<caller>/timestamp`

pub const ENDPOINTS_KEY_PREFIX: &str = "/registry/services/endpoints";
pub const LAMEDUCK_KEY_PREFIX: &str = "/registry/services/lameducks";
pub const GRAPH_KEY_PREFIX: &str = "/registry/services/graph";

pub const TIMESTAMP_KEY: &str = "timestamp";

/// The store key holding all endpoints of one service.
pub fn service_key(namespace: &str, service_name: &str) -> String {
    format!("{}/{}/{}", ENDPOINTS_KEY_PREFIX, namespace, service_name)
}

/// The store key for a single instance of a service.
pub fn endpoint_key(namespace: &str, service_name: &str, host: &str, port: i32) -> String {
    format!("{}/{}_{}", service_key(namespace, service_name), host, port)
}

/// The label key carrying an instance's weight inside its record.
pub fn weight_key(host: &str, port: i32) -> String {
    format!("{}_{}_weight", host, port)
}

/// The graph marker key recording "caller depends on callee".
pub fn graph_key(callee_namespace: &str, callee_service: &str, caller: &str) -> String {
    format!(
        "{}/{}/{}/clients/{}/{}",
        GRAPH_KEY_PREFIX, callee_namespace, callee_service, caller, TIMESTAMP_KEY
    )
}

/// Maps an endpoint key back to the service key it belongs to (its
/// parent path). Returns `None` for keys outside the endpoints prefix.
pub fn parent_service_key(endpoint_key: &str) -> Option<String> {
    if !endpoint_key.starts_with(ENDPOINTS_KEY_PREFIX) {
        return None;
    }
    endpoint_key.rfind('/').map(|pos| endpoint_key[..pos].to_string())
}

/// Extracts the `host:port` entry from a lame-duck marker key.
pub fn lameduck_entry(key: &str) -> Option<String> {
    if !key.starts_with(LAMEDUCK_KEY_PREFIX) {
        return None;
    }
    let entry = key.rsplit('/').next()?;
    if entry.contains(':') {
        Some(entry.to_string())
    } else {
        None
    }
}

/// Splits a graph marker key into `(callee, caller)`. Marker keys end
/// in `.../<callee>/clients/<caller>/timestamp`.
pub fn parse_graph_key(key: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = key.split('/').collect();
    let len = segments.len();
    if len < 4 || segments[len - 1] != TIMESTAMP_KEY || segments[len - 3] != "clients" {
        return None;
    }
    Some((segments[len - 4].to_string(), segments[len - 2].to_string()))
}
