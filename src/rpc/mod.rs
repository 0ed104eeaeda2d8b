mod service;
pub use service::*;

#[cfg(test)]
mod service_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tonic::codec::CompressionEncoding;
use tonic_health::server::health_reporter;
use tracing::error;
use tracing::info;

use crate::hub::Registry;
use crate::proto::discovery::discovery_server::DiscoveryServer;
use crate::Error;
use crate::Result;
use crate::RpcConfig;

/// Binds the discovery service and the gRPC health service and serves
/// until the shutdown signal fires.
pub async fn start_rpc_server(
    registry: Arc<Registry>,
    rpc_config: RpcConfig,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let listen_addr = rpc_config.listen_socket_addr()?;

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter.set_serving::<DiscoveryServer<DiscoveryService>>().await;

    let discovery = DiscoveryService::new(registry, rpc_config.clone());

    info!("Discovery server listening on {}", listen_addr);
    tonic::transport::Server::builder()
        .tcp_keepalive(Some(Duration::from_secs(rpc_config.tcp_keepalive_secs)))
        .http2_keepalive_interval(Some(Duration::from_secs(rpc_config.http2_keepalive_interval_secs)))
        .tcp_nodelay(true)
        .add_service(health_service)
        .add_service(
            DiscoveryServer::new(discovery)
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_shutdown(listen_addr, async move {
            let _ = shutdown_signal.changed().await;
            info!("RPC server shutting down");
        })
        .await
        .map_err(|e| {
            error!("RPC server error: {:?}", e);
            Error::Fatal(format!("rpc server failed: {}", e))
        })
}
