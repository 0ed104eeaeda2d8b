//! The discovery gRPC service: `Resolve` streams endpoint updates to
//! subscribing clients, `ReportLoad` ingests instance heartbeats. Both
//! handlers delegate the long-lived work to plain async loops over
//! channels so the protocol logic is testable without a live
//! connection.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use autometrics::autometrics;
use futures::Stream;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic::Streaming;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::CHAN_CAP_MULTIPLIER;
use crate::hub::spec_key;
use crate::hub::spec_label;
use crate::hub::EndpointsUpdate;
use crate::hub::Registry;
use crate::metrics::ACTIVE_OBSERVER_GAUGE;
use crate::metrics::ACTIVE_REPORTER_GAUGE;
use crate::metrics::ADD_OBSERVER_FAIL_COUNTS;
use crate::metrics::AUTO_DISCONN_COUNTS;
use crate::metrics::INIT_REPORT_LOAD_COUNTS;
use crate::metrics::NOTIFY_CHAN_USAGE_HISTOGRAM;
use crate::metrics::OBSERVE_RPC_COUNTS;
use crate::metrics::REPORT_LOAD_COUNTS;
use crate::metrics::REPORT_LOAD_RPC_COUNTS;
use crate::proto::discovery::discovery_server::Discovery;
use crate::proto::discovery::LoadReport;
use crate::proto::discovery::ReportLoadResponse;
use crate::proto::discovery::ResolveRequest;
use crate::proto::discovery::ResolveResponse;
use crate::API_SLO;
use crate::utils::net::host_port;
use crate::utils::net::peer_host;
use crate::RpcConfig;
use crate::RpcError;

pub struct DiscoveryService {
    registry: Arc<Registry>,
    rpc_config: RpcConfig,
}

impl DiscoveryService {
    pub fn new(registry: Arc<Registry>, rpc_config: RpcConfig) -> Self {
        Self { registry, rpc_config }
    }
}

#[tonic::async_trait]
impl Discovery for DiscoveryService {
    type ResolveStream = Pin<Box<dyn Stream<Item = std::result::Result<ResolveResponse, Status>> + Send>>;

    /// Registers the caller for every requested service and streams
    /// endpoint updates until the client goes away, wedges, or the
    /// randomized auto-disconnect horizon lapses.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    async fn resolve(&self, request: Request<ResolveRequest>) -> std::result::Result<Response<Self::ResolveStream>, Status> {
        OBSERVE_RPC_COUNTS.inc();

        let client_addr = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .ok_or_else(|| Status::internal(RpcError::MissingPeerInfo.to_string()))?;
        let req = request.into_inner();
        if req.services.is_empty() {
            return Err(Status::invalid_argument(RpcError::EmptyServiceList.to_string()));
        }

        info!(
            "Resolve from {} ({}|{}) for {} services",
            client_addr,
            req.caller_service_id,
            req.caller_service_name,
            req.services.len()
        );

        for spec in &req.services {
            self.registry.track_service_graph(&req, spec).await;
        }

        let updates = match self.registry.add_observer(&req.services, &client_addr).await {
            Ok(updates) => updates,
            Err(e) => {
                for spec in &req.services {
                    ADD_OBSERVER_FAIL_COUNTS.with_label_values(&[&spec_label(spec)]).inc();
                    self.registry.untrack_service_graph(&req, spec);
                }
                error!("Failed to register observers for {}: {}", client_addr, e);
                return Err(Status::internal(e.to_string()));
            }
        };

        for spec in &req.services {
            ACTIVE_OBSERVER_GAUGE.with_label_values(&[&spec_label(spec)]).inc();
        }

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_resolve_loop(
            Arc::clone(&self.registry),
            req,
            client_addr,
            updates,
            tx,
            self.rpc_config.auto_disconnect(),
            self.rpc_config.send_timeout(),
        ));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    /// Consumes a heartbeat stream from one instance, keeping its store
    /// record alive until the stream ends or the instance drains.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    async fn report_load(
        &self,
        request: Request<Streaming<LoadReport>>,
    ) -> std::result::Result<Response<ReportLoadResponse>, Status> {
        REPORT_LOAD_RPC_COUNTS.inc();

        let peer = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .ok_or_else(|| Status::internal(RpcError::MissingPeerInfo.to_string()))?;
        let reports = request.into_inner();

        run_report_loop(&self.registry, &peer_host(&peer), reports).await?;
        Ok(Response::new(ReportLoadResponse {}))
    }
}

/// Drains registry updates into the response stream. Per-spec update
/// ids deduplicate overlapping pushes; a send timeout abandons a wedged
/// client; the auto-disconnect timer sheds the connection so clients
/// re-resolve and spread across replicas. Always tears the observers
/// down on exit.
pub(crate) async fn run_resolve_loop(
    registry: Arc<Registry>,
    req: ResolveRequest,
    client_addr: String,
    mut updates: mpsc::Receiver<EndpointsUpdate>,
    out: mpsc::Sender<std::result::Result<ResolveResponse, Status>>,
    auto_disconnect: Duration,
    send_timeout: Duration,
) {
    let jitter = rand::thread_rng().gen_range(0..=auto_disconnect.as_secs());
    let disconnect_at = sleep(auto_disconnect + Duration::from_secs(jitter));
    tokio::pin!(disconnect_at);

    let capacity = CHAN_CAP_MULTIPLIER * req.services.len().max(1);
    let mut max_ids: HashMap<String, i64> = HashMap::new();

    loop {
        tokio::select! {
            _ = &mut disconnect_at => {
                AUTO_DISCONN_COUNTS.inc();
                info!("Auto disconnect client {} for rebalance", client_addr);
                break;
            }
            update = updates.recv() => {
                let Some(update) = update else {
                    debug!("Update queue for client {} closed", client_addr);
                    break;
                };
                NOTIFY_CHAN_USAGE_HISTOGRAM.observe(updates.len() as f64 / capacity as f64);

                let Some(spec) = update.endpoints.spec.as_ref() else {
                    continue;
                };
                let key = spec_key(spec);
                let max_id = max_ids.entry(key).or_insert(0);
                if update.id <= *max_id {
                    debug!(
                        "Skip stale update {} (max {}) for client {}",
                        update.id, max_id, client_addr
                    );
                    continue;
                }
                *max_id = update.id;

                let response = ResolveResponse {
                    svc_endpoints: vec![update.endpoints],
                };
                match timeout(send_timeout, out.send(Ok(response))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        debug!("Client {} went away", client_addr);
                        break;
                    }
                    Err(_) => {
                        warn!("Send to client {} timed out, abandoning stream", client_addr);
                        break;
                    }
                }
            }
        }
    }

    registry.remove_observer(&req.services, &client_addr);
    for spec in &req.services {
        registry.untrack_service_graph(&req, spec);
        ACTIVE_OBSERVER_GAUGE.with_label_values(&[&spec_label(spec)]).dec();
    }
}

/// Consumes one heartbeat stream. The first report (re)creates the
/// instance record so a fresh weight always lands; follow-ups only
/// refresh the TTL. Heartbeats from lame-duck instances are swallowed
/// so their records expire.
pub(crate) async fn run_report_loop<S>(
    registry: &Registry,
    peer: &str,
    reports: S,
) -> std::result::Result<(), Status>
where
    S: Stream<Item = std::result::Result<LoadReport, Status>> + Unpin,
{
    let mut active_endpoint: Option<String> = None;
    let result = consume_reports(registry, peer, reports, &mut active_endpoint).await;
    if let Some(endpoint) = active_endpoint {
        ACTIVE_REPORTER_GAUGE.with_label_values(&[&endpoint]).dec();
    }
    result
}

async fn consume_reports<S>(
    registry: &Registry,
    peer: &str,
    mut reports: S,
    active_endpoint: &mut Option<String>,
) -> std::result::Result<(), Status>
where
    S: Stream<Item = std::result::Result<LoadReport, Status>> + Unpin,
{
    let mut first = true;
    loop {
        let report = match reports.next().await {
            None => return Ok(()),
            Some(Err(status)) => {
                debug!("Load report stream from {} ended: {}", peer, status);
                return Ok(());
            }
            Some(Ok(report)) => report,
        };

        let Some(spec) = report.spec.clone() else {
            return Err(Status::invalid_argument("load report missing service spec"));
        };
        // An instance behind a NAT or a proxy reports the address its
        // clients actually reach it at.
        let host = if report.fixed_host.is_empty() {
            peer.to_string()
        } else {
            report.fixed_host.clone()
        };
        let endpoint = host_port(&host, report.port);

        if first {
            info!("Init load report from {} for {}", endpoint, spec_label(&spec));
            INIT_REPORT_LOAD_COUNTS.with_label_values(&[&spec_label(&spec)]).inc();
            ACTIVE_REPORTER_GAUGE.with_label_values(&[&endpoint]).inc();
            *active_endpoint = Some(endpoint.clone());
        }
        REPORT_LOAD_COUNTS.with_label_values(&[&spec_label(&spec)]).inc();

        if registry.is_lameduck(&endpoint) {
            debug!("Skip heartbeat from lame duck {}", endpoint);
            first = false;
            continue;
        }

        let persisted = if first {
            registry.insert_endpoint(&spec, &host, report.port, report.weight).await
        } else {
            registry.upsert_endpoint(&spec, &host, report.port, report.weight).await
        };
        if let Err(e) = persisted {
            error!("Failed to persist load report from {}: {}", endpoint, e);
            return Err(Status::internal(format!("failed to persist load report: {}", e)));
        }
        first = false;
    }
}
