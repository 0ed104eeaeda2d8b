use std::sync::Arc;

use svchub::utils::file_io;
use svchub::EndpointStore;
use svchub::Error;
use svchub::EtcdStore;
use svchub::MemoryStore;
use svchub::Registry;
use svchub::Result;
use svchub::Settings;
use svchub::StoreBackend;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let settings = Settings::load(None)?;

    // Initializing Logs
    let _guard = init_observability(&settings)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let store = build_store(&settings).await?;
    let registry = Registry::new(store, settings.registry.clone(), settings.graph.clone());
    registry.spawn_watchers(graceful_rx.clone());

    let metrics_server = tokio::spawn(svchub::start_metrics_server(
        settings.rpc.metrics_port,
        graceful_rx.clone(),
    ));

    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    info!("Registry server started. Waiting for CTRL+C signal...");
    if let Err(e) = svchub::start_rpc_server(registry, settings.rpc.clone(), graceful_rx).await {
        error!("rpc server stopped: {:?}", e);
    }

    metrics_server.await?;
    println!("Exiting program.");
    Ok(())
}

async fn build_store(settings: &Settings) -> Result<Arc<dyn EndpointStore>> {
    match settings.store.backend {
        StoreBackend::Etcd => {
            let store = EtcdStore::connect(&settings.store, &settings.graph).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store backend; registrations are local to this process");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

fn init_observability(settings: &Settings) -> Result<WorkerGuard> {
    let log_file = file_io::open_file_for_append(settings.log_dir.join("svchub.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
