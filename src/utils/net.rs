/// Strips the port from a `host:port` peer address. IPv6 peers come in
/// as `[::1]:port`, so split on the last colon.
pub(crate) fn peer_host(addr: &str) -> String {
    match addr.rfind(':') {
        Some(pos) => addr[..pos].to_string(),
        None => addr.to_string(),
    }
}

/// The `host:port` form used for lame-duck entries and endpoint map keys.
pub(crate) fn host_port(host: &str, port: i32) -> String {
    format!("{}:{}", host, port)
}
