//! Per-(connection × service) delivery of endpoint updates with
//! backpressure: a bounded queue, a notify timeout, and a cancellation
//! token that unblocks in-flight deliveries the moment the connection
//! goes away.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::endpoints::spec_key;
use super::endpoints::EndpointsUpdate;
use crate::metrics::NOTIFY_TIMEOUT_COUNTS;
use crate::proto::discovery::ServiceSpec;

/// One live subscription binding a client connection to one service's
/// update stream. Multiple observers may share a client address
/// (duplicate subscriptions over one connection); they are all removed
/// together.
pub struct ClientObserver {
    spec: ServiceSpec,
    client_addr: String,
    tx: mpsc::Sender<EndpointsUpdate>,
    cancel: CancellationToken,
}

impl ClientObserver {
    pub fn new(spec: ServiceSpec, client_addr: String, tx: mpsc::Sender<EndpointsUpdate>) -> Self {
        Self {
            spec,
            client_addr,
            tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }

    pub fn matches(&self, spec: &ServiceSpec, client_addr: &str) -> bool {
        self.client_addr == client_addr && spec_key(&self.spec) == spec_key(spec)
    }

    /// Delivers one update. If the queue stays full past
    /// `notify_timeout` and the observer has not been closed, the
    /// update is dropped for this observer only; a later full-snapshot
    /// push supersedes it.
    pub async fn notify(&self, update: EndpointsUpdate, notify_timeout: Duration) {
        let update_id = update.id;
        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(
                    "Observer for client {} closed, dropping update {}",
                    self.client_addr, update_id
                );
            }
            sent = timeout(notify_timeout, self.tx.send(update)) => {
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        debug!("Delivery queue of client {} closed, update dropped", self.client_addr);
                    }
                    Err(_) => {
                        NOTIFY_TIMEOUT_COUNTS
                            .with_label_values(&[&spec_key(&self.spec), &self.client_addr])
                            .inc();
                        debug!(
                            "Notify timeout for client {} on {}, update dropped",
                            self.client_addr,
                            spec_key(&self.spec)
                        );
                    }
                }
            }
        }
    }

    /// Fires the close signal; any pending delivery unblocks and the
    /// registry discards this observer on next fanout.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
