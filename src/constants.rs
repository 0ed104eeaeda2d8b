use std::time::Duration;

/// Delivery queue capacity is this multiplier times the number of
/// subscribed service specs.
pub const CHAN_CAP_MULTIPLIER: usize = 10;

/// Graph marker writes are best-effort; give up after this many attempts.
pub const GRAPH_WRITE_RETRIES: usize = 3;

/// Backoff between watch attempts after a transient store error.
pub const WATCH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Throttle between graph marker refresh writes (20 keys/sec).
pub const GRAPH_REFRESH_THROTTLE: Duration = Duration::from_millis(50);
