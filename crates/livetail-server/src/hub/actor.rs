//! The hub loop.

use std::collections::HashMap;
use std::sync::Arc;

use livetail_core::ClientId;
use livetail_events::Event;
use metrics::{counter, gauge};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::monitor::HubEvent;
use super::pairing::{self, FilterRequest};
use super::{Removal, RemovalReason, relay};
use crate::config::HubConfig;
use crate::errors::HubError;
use crate::metrics::{
    HUB_BROADCAST_EVENTS_TOTAL, HUB_DELIVERIES_TOTAL, HUB_EVICTIONS_TOTAL,
    HUB_SESSIONS_REGISTERED, HUB_SUPERSEDED_TOTAL, PAIRING_DROPPED_TOTAL, PAIRING_MATCHED_TOTAL,
    PAIRING_RETRIES_TOTAL,
};
use crate::websocket::connection::ClientSession;

/// The registry owner. Built by [`super::channel`], consumed by [`Hub::run`].
pub struct Hub {
    pub(super) config: HubConfig,
    pub(super) registry: HashMap<ClientId, Arc<ClientSession>>,
    pub(super) add_rx: mpsc::Receiver<Arc<ClientSession>>,
    pub(super) broadcast_rx: mpsc::Receiver<Event>,
    pub(super) snapshot_rx: mpsc::Receiver<oneshot::Sender<Vec<ClientId>>>,
    pub(super) del_rx: mpsc::UnboundedReceiver<Removal>,
    pub(super) filter_rx: mpsc::UnboundedReceiver<FilterRequest>,
    pub(super) filter_tx: mpsc::UnboundedSender<FilterRequest>,
    pub(super) error_rx: mpsc::UnboundedReceiver<HubError>,
    pub(super) errors: mpsc::Sender<HubError>,
    pub(super) monitor: broadcast::Sender<HubEvent>,
    pub(super) shutdown: CancellationToken,
}

impl Hub {
    /// Service the inboxes one message at a time until shutdown, or until
    /// every handle is gone.
    ///
    /// Inboxes are polled in a fixed order so that a de-registration posted
    /// while handling a broadcast is applied before anything queued after it.
    #[instrument(skip_all, name = "hub")]
    pub async fn run(mut self) {
        info!("broadcast hub started");
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(removal) = self.del_rx.recv() => self.remove(removal),
                Some(session) = self.add_rx.recv() => self.register(session),
                Some(request) = self.filter_rx.recv() => self.pair(request),
                Some(err) = self.error_rx.recv() => self.relay_error(err),
                event = self.broadcast_rx.recv() => match event {
                    Some(event) => self.broadcast(&event),
                    None => break,
                },
                Some(reply) = self.snapshot_rx.recv() => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        info!(clients = self.registry.len(), "broadcast hub stopped");
        gauge!(HUB_SESSIONS_REGISTERED).set(0.0);
    }

    fn register(&mut self, session: Arc<ClientSession>) {
        let client_id = session.client_id().clone();
        let connection_id = session.connection_id();
        if session.is_closed() {
            debug!(%client_id, %connection_id, "session closed before registration, skipping");
            return;
        }

        if let Some(previous) = self.registry.insert(client_id.clone(), session) {
            info!(
                %client_id,
                previous = %previous.connection_id(),
                current = %connection_id,
                "session superseded"
            );
            counter!(HUB_SUPERSEDED_TOTAL).increment(1);
            self.emit(HubEvent::Superseded {
                client_id: client_id.clone(),
                previous: previous.connection_id(),
                current: connection_id,
            });
        }

        debug!(%client_id, %connection_id, clients = self.registry.len(), "session registered");
        self.update_gauge();
        self.emit(HubEvent::Registered {
            client_id,
            connection_id,
        });
    }

    fn remove(&mut self, removal: Removal) {
        let Removal { session, reason } = removal;
        let client_id = session.client_id();
        let connection_id = session.connection_id();

        let is_current = self
            .registry
            .get(client_id)
            .is_some_and(|current| current.connection_id() == connection_id);
        if !is_current {
            debug!(%client_id, %connection_id, "removal for unregistered session ignored");
            return;
        }

        let _ = self.registry.remove(client_id);
        self.update_gauge();
        let client_id = client_id.clone();
        match reason {
            RemovalReason::Overflow => {
                counter!(HUB_EVICTIONS_TOTAL).increment(1);
                info!(%client_id, %connection_id, "session evicted");
                self.emit(HubEvent::Evicted {
                    client_id,
                    connection_id,
                });
            }
            RemovalReason::Disconnected => {
                debug!(%client_id, %connection_id, "session removed");
                self.emit(HubEvent::Removed {
                    client_id,
                    connection_id,
                });
            }
        }
    }

    /// Match and enqueue. The frame is serialized once, before any session
    /// sees it, so a client can only ever receive a complete event.
    fn broadcast(&mut self, event: &Event) {
        counter!(HUB_BROADCAST_EVENTS_TOTAL).increment(1);
        let frame = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                error!(event_id = event.id, error = %e, "failed to serialize event");
                return;
            }
        };

        let mut delivered = 0_u64;
        for session in self.registry.values() {
            if session.accepts(event) && session.enqueue(Arc::clone(&frame)) {
                delivered += 1;
            }
        }
        counter!(HUB_DELIVERIES_TOTAL).increment(delivered);
        debug!(event_id = event.id, key = %event.key, recipients = delivered, "broadcast event");
    }

    fn pair(&mut self, request: FilterRequest) {
        if let Some(session) = self.registry.get(&request.client_id) {
            info!(client_id = %request.client_id, attempts = request.attempts, "client filter matched");
            session.set_filter(request.filter);
            counter!(PAIRING_MATCHED_TOTAL).increment(1);
            self.emit(HubEvent::FilterPaired {
                client_id: request.client_id,
                attempts: request.attempts,
            });
            return;
        }

        if request.can_retry(self.config.pairing_max_attempts) {
            let request = request.next_attempt();
            debug!(client_id = %request.client_id, attempt = request.attempts, "requeueing filter");
            counter!(PAIRING_RETRIES_TOTAL).increment(1);
            self.emit(HubEvent::FilterRequeued {
                client_id: request.client_id.clone(),
                attempts: request.attempts,
            });
            pairing::schedule_retry(
                request,
                self.config.pairing_retry_delay,
                self.filter_tx.clone(),
                self.shutdown.clone(),
            );
        } else {
            info!(client_id = %request.client_id, attempts = request.attempts, "dropping unpaired filter");
            counter!(PAIRING_DROPPED_TOTAL).increment(1);
            self.emit(HubEvent::FilterDropped {
                client_id: request.client_id,
                attempts: request.attempts,
            });
        }
    }

    fn relay_error(&self, err: HubError) {
        warn!(error = %err, "hub error");
        relay(&self.errors, err);
    }

    fn snapshot(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn emit(&self, event: HubEvent) {
        // No subscribers is fine.
        let _ = self.monitor.send(event);
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauge(&self) {
        gauge!(HUB_SESSIONS_REGISTERED).set(self.registry.len() as f64);
    }
}
