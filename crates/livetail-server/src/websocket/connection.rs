//! Per-connection session state shared by the hub and the session's own
//! reader and writer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use livetail_core::ClientId;
use livetail_events::Query;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use crate::errors::HubError;
use crate::hub::{HubLink, Removal, RemovalReason};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one physical connection.
///
/// Several connections may share a [`ClientId`] over time; this tells them
/// apart so a stale de-registration cannot remove a newer session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One live streaming subscriber.
///
/// The filter is replaced by the session's reader or by the hub when a
/// submitted filter is paired; it is read by the hub on every broadcast. The
/// outbound queue carries frames that were already matched and serialized.
pub struct ClientSession {
    client_id: ClientId,
    connection_id: ConnectionId,
    filter: RwLock<Query>,
    outbound: mpsc::Sender<Arc<String>>,
    closed: AtomicBool,
    done: CancellationToken,
    link: HubLink,
    connected_at: Instant,
}

impl ClientSession {
    pub(crate) fn new(
        client_id: ClientId,
        outbound: mpsc::Sender<Arc<String>>,
        link: HubLink,
        done: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            connection_id: ConnectionId::next(),
            filter: RwLock::new(Query::default()),
            outbound,
            closed: AtomicBool::new(false),
            done,
            link,
            connected_at: Instant::now(),
        }
    }

    /// Logical client id.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Physical connection id.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Snapshot of the current filter.
    pub fn filter(&self) -> Query {
        self.filter.read().clone()
    }

    /// Evaluate the current filter against `event` without cloning it.
    pub fn accepts(&self, event: &livetail_events::Event) -> bool {
        livetail_events::matches(&self.filter.read(), event)
    }

    /// Replace the current filter.
    pub fn set_filter(&self, filter: Query) {
        *self.filter.write() = filter;
    }

    /// Whether de-registration has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Resolves once the session is shutting down.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// Whether the shutdown signal has fired.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Try to place a frame on the outbound queue without waiting.
    ///
    /// A full queue means the consumer cannot keep up: the session is closed,
    /// de-registration is requested and [`HubError::Overflow`] is reported. A
    /// closed queue closes the session quietly. Returns whether the frame was
    /// queued.
    pub fn enqueue(self: &Arc<Self>, frame: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    client_id = %self.client_id,
                    connection_id = %self.connection_id,
                    "outbound queue full, evicting client"
                );
                let _ = self.close(
                    RemovalReason::Overflow,
                    Some(HubError::Overflow(self.client_id.clone())),
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client_id = %self.client_id, "outbound queue closed");
                let _ = self.close(RemovalReason::Disconnected, None);
                false
            }
        }
    }

    /// Request de-registration and signal both loops to stop.
    ///
    /// Idempotent: only the first call posts the removal (and `error`, if
    /// any). Returns whether this call closed the session.
    pub fn close(self: &Arc<Self>, reason: RemovalReason, error: Option<HubError>) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(
            client_id = %self.client_id,
            connection_id = %self.connection_id,
            ?reason,
            "closing session"
        );
        self.link.remove(Removal {
            session: Arc::clone(self),
            reason,
        });
        if let Some(error) = error {
            self.link.report(error);
        }
        self.done.cancel();
        true
    }

    /// Forward a non-fatal error to the hub.
    pub fn report(&self, error: HubError) {
        self.link.report(error);
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .field("connection_id", &self.connection_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
