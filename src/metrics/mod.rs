use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::linear_buckets;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

#[cfg(test)]
mod metrics_test;

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace("infra").subsystem("svchub")
}

lazy_static! {
    pub static ref ADD_OBSERVER_GAUGE: IntGaugeVec =
        IntGaugeVec::new(opts("add_observer_gauge", "Observer registrations."), &["service"])
            .expect("metric can not be created");

    pub static ref REMOVE_OBSERVER_GAUGE: IntGaugeVec =
        IntGaugeVec::new(opts("remove_observer_gauge", "Observer removals."), &["service"])
            .expect("metric can not be created");

    pub static ref ACTIVE_OBSERVER_GAUGE: IntGaugeVec =
        IntGaugeVec::new(opts("active_observer_gauge", "Active resolve observers."), &["service"])
            .expect("metric can not be created");

    pub static ref ACTIVE_REPORTER_GAUGE: IntGaugeVec =
        IntGaugeVec::new(opts("active_reporter_gauge", "Active load reporters."), &["endpoint"])
            .expect("metric can not be created");

    pub static ref ADD_OBSERVER_FAIL_COUNTS: IntCounterVec =
        IntCounterVec::new(opts("add_observer_fail_counts", "Failed observer registrations."), &["service"])
            .expect("metric can not be created");

    pub static ref OBSERVE_RPC_COUNTS: IntCounter =
        IntCounter::with_opts(opts("observe_rpc_counts", "Resolve rpc counts."))
            .expect("metric can not be created");

    pub static ref REPORT_LOAD_RPC_COUNTS: IntCounter =
        IntCounter::with_opts(opts("report_load_rpc_counts", "Report load rpc counts."))
            .expect("metric can not be created");

    pub static ref REPORT_LOAD_COUNTS: IntCounterVec =
        IntCounterVec::new(opts("report_load_counts", "Load reports received."), &["service"])
            .expect("metric can not be created");

    pub static ref INIT_REPORT_LOAD_COUNTS: IntCounterVec =
        IntCounterVec::new(opts("init_report_load_counts", "First load reports per connection."), &["service"])
            .expect("metric can not be created");

    pub static ref AUTO_DISCONN_COUNTS: IntCounter =
        IntCounter::with_opts(opts("auto_disconn_counts", "Auto disconnect counts."))
            .expect("metric can not be created");

    // Notify timeouts should be rare, so recording the client address
    // in a label value does not accumulate much data.
    pub static ref NOTIFY_TIMEOUT_COUNTS: IntCounterVec = IntCounterVec::new(
        opts("notify_timeout_counts", "Endpoint update notify timeout counts."),
        &["caller_service", "caller_addr"]
    )
    .expect("metric can not be created");

    pub static ref NOTIFY_CHAN_USAGE_HISTOGRAM: Histogram = Histogram::with_opts(
        HistogramOpts::new("notify_chan_usage", "The usage rate of the delivery queue.")
            .namespace("infra")
            .subsystem("svchub")
            .buckets(linear_buckets(0.0, 0.1, 10).expect("linear buckets"))
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(ADD_OBSERVER_GAUGE.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REMOVE_OBSERVER_GAUGE.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_OBSERVER_GAUGE.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_REPORTER_GAUGE.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ADD_OBSERVER_FAIL_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(OBSERVE_RPC_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REPORT_LOAD_RPC_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REPORT_LOAD_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(INIT_REPORT_LOAD_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(AUTO_DISCONN_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(NOTIFY_TIMEOUT_COUNTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(NOTIFY_CHAN_USAGE_HISTOGRAM.clone()))
        .expect("collector can be registered");
}

pub async fn start_metrics_server(port: u16, mut shutdown_signal: watch::Receiver<()>) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        eprintln!("could not encode custom metrics: {}", e);
    };
    let mut res = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };

    res.push_str(&get_metrics_body());
    Ok(res)
}

/// Export autometrics-collected metrics for Prometheus to scrape
pub fn get_metrics_body() -> String {
    let autometrics_response = prometheus_exporter::encode_http_response();
    autometrics_response.into_body()
}
