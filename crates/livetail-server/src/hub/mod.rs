//! The broadcast hub: a single actor that owns the client registry.
//!
//! Every registry mutation and every broadcast goes through one selection loop
//! ([`Hub::run`]), so the registry needs no lock and is never touched from
//! outside. Other contexts talk to it through a cloneable [`HubHandle`]:
//!
//! - `add` / `broadcast` use bounded inboxes and wait for capacity
//! - de-registration, errors and filter pairing use unbounded inboxes so that
//!   sessions and the hub itself can post without ever blocking
//! - the registry snapshot is answered over a oneshot from inside the loop

pub mod actor;
pub mod handle;
pub mod monitor;
pub mod pairing;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

pub use actor::Hub;
pub use handle::HubHandle;
pub use monitor::HubEvent;
pub use pairing::FilterRequest;

use crate::config::HubConfig;
use crate::errors::HubError;
use crate::websocket::connection::ClientSession;

/// Why a session asked to leave the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    /// The connection ended (EOF, transport failure, closed queue).
    Disconnected,
    /// The outbound queue overflowed.
    Overflow,
}

/// A de-registration request.
#[derive(Debug)]
pub struct Removal {
    /// Session to remove. Only removed if it is still the registered one.
    pub session: Arc<ClientSession>,
    /// Why.
    pub reason: RemovalReason,
}

/// The two hub inboxes a session may post to.
#[derive(Clone, Debug)]
pub(crate) struct HubLink {
    removals: mpsc::UnboundedSender<Removal>,
    errors: mpsc::UnboundedSender<HubError>,
}

impl HubLink {
    pub(crate) fn new(
        removals: mpsc::UnboundedSender<Removal>,
        errors: mpsc::UnboundedSender<HubError>,
    ) -> Self {
        Self { removals, errors }
    }

    pub(crate) fn remove(&self, removal: Removal) {
        if self.removals.send(removal).is_err() {
            trace!("hub stopped, removal discarded");
        }
    }

    pub(crate) fn report(&self, error: HubError) {
        if let Err(e) = self.errors.send(error) {
            trace!(error = %e.0, "hub stopped, error discarded");
        }
    }
}

/// Build a hub and its handle without starting the loop.
///
/// `errors` is the owning process's error channel; `shutdown` stops the loop,
/// cancels pending pairing retries and closes every session created through
/// the handle.
pub fn channel(
    config: HubConfig,
    errors: mpsc::Sender<HubError>,
    shutdown: CancellationToken,
) -> (HubHandle, Hub) {
    let capacity = config.channel_capacity.max(1);
    let (add_tx, add_rx) = mpsc::channel(capacity);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
    let (snapshot_tx, snapshot_rx) = mpsc::channel(16);
    let (del_tx, del_rx) = mpsc::unbounded_channel();
    let (filter_tx, filter_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let (monitor, _) = broadcast::channel(config.monitor_capacity.max(1));

    let handle = HubHandle {
        add_tx,
        broadcast_tx,
        snapshot_tx,
        filter_tx: filter_tx.clone(),
        link: HubLink::new(del_tx, error_tx),
        monitor: monitor.clone(),
        shutdown: shutdown.clone(),
        outbound_capacity: config.outbound_queue_capacity.max(1),
    };
    let hub = Hub {
        config,
        registry: std::collections::HashMap::new(),
        add_rx,
        broadcast_rx,
        snapshot_rx,
        del_rx,
        filter_rx,
        filter_tx,
        error_rx,
        errors,
        monitor,
        shutdown,
    };
    (handle, hub)
}

/// Build a hub and run it on the current runtime.
pub fn spawn(
    config: HubConfig,
    errors: mpsc::Sender<HubError>,
    shutdown: CancellationToken,
) -> (HubHandle, JoinHandle<()>) {
    let (handle, hub) = channel(config, errors, shutdown);
    (handle, tokio::spawn(hub.run()))
}

/// Push an error onto the process error channel without waiting.
pub(crate) fn relay(errors: &mpsc::Sender<HubError>, error: HubError) {
    match errors.try_send(error) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(e)) => {
            warn!(error = %e, "process error channel full, dropping error");
        }
        Err(mpsc::error::TrySendError::Closed(e)) => {
            warn!(error = %e, "process error channel closed, dropping error");
        }
    }
}
