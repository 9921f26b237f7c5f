//! Cloneable entry point to the hub.

use std::sync::Arc;

use livetail_core::ClientId;
use livetail_events::{Event, Query};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::monitor::HubEvent;
use super::pairing::FilterRequest;
use super::{HubLink, Removal, RemovalReason};
use crate::errors::HubError;
use crate::websocket::connection::ClientSession;

/// Handle used by the gateway, the REST service and the upstream pipeline.
#[derive(Clone, Debug)]
pub struct HubHandle {
    pub(super) add_tx: mpsc::Sender<Arc<ClientSession>>,
    pub(super) broadcast_tx: mpsc::Sender<Event>,
    pub(super) snapshot_tx: mpsc::Sender<oneshot::Sender<Vec<ClientId>>>,
    pub(super) filter_tx: mpsc::UnboundedSender<FilterRequest>,
    pub(super) link: HubLink,
    pub(super) monitor: broadcast::Sender<HubEvent>,
    pub(super) shutdown: CancellationToken,
    pub(super) outbound_capacity: usize,
}

impl HubHandle {
    /// Create a session for a freshly upgraded connection.
    ///
    /// Returns the session and the receiving end of its outbound queue, which
    /// the writer drains. The session is not registered until [`add`] is
    /// called.
    ///
    /// [`add`]: Self::add
    pub fn open_session(&self, client_id: ClientId) -> (Arc<ClientSession>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let session = ClientSession::new(
            client_id,
            tx,
            self.link.clone(),
            self.shutdown.child_token(),
        );
        (Arc::new(session), rx)
    }

    /// Register a session, superseding any session with the same client id.
    pub async fn add(&self, session: Arc<ClientSession>) -> Result<(), HubError> {
        self.add_tx
            .send(session)
            .await
            .map_err(|_| HubError::HubStopped)
    }

    /// Ask the hub to drop `session` from the registry.
    ///
    /// Removal matches on the connection, not just the client id: if a newer
    /// connection has since registered under the same id, a late `del` from
    /// the stale session is a no-op and the replacement stays registered.
    pub fn del(&self, session: Arc<ClientSession>, reason: RemovalReason) {
        self.link.remove(Removal { session, reason });
    }

    /// Fan `event` out to every session whose filter matches it.
    pub async fn broadcast(&self, event: Event) -> Result<(), HubError> {
        self.broadcast_tx
            .send(event)
            .await
            .map_err(|_| HubError::HubStopped)
    }

    /// Steer the future deliveries of `client_id`'s live session.
    ///
    /// Fire-and-forget: pairing happens asynchronously in the hub, and a
    /// request for a client that never connects is silently dropped after the
    /// retry budget is spent.
    pub fn submit_filter(&self, client_id: ClientId, filter: Query) {
        if self
            .filter_tx
            .send(FilterRequest::new(client_id, filter))
            .is_err()
        {
            debug!("hub stopped, filter submission discarded");
        }
    }

    /// Relay an error to the process error channel through the hub.
    pub fn report(&self, error: HubError) {
        self.link.report(error);
    }

    /// Client ids currently registered, as seen by the hub loop.
    pub async fn clients(&self) -> Result<Vec<ClientId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.snapshot_tx
            .send(tx)
            .await
            .map_err(|_| HubError::HubStopped)?;
        rx.await.map_err(|_| HubError::HubStopped)
    }

    /// Subscribe to registry and pairing events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.monitor.subscribe()
    }

    /// Stop the hub loop. Also cancels pending pairing retries and closes
    /// every session opened through this handle.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Whether the hub has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
