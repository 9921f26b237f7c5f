//! Filter pairing: associating a REST-submitted filter with the live session
//! that shares its client id.
//!
//! The REST request and the websocket upgrade are independent, so the filter
//! often arrives before the connection is registered. A miss is not waited on
//! inside the hub; instead a timer task re-injects the request into the hub's
//! own filter inbox after a fixed delay, up to a bounded number of times.

use std::time::Duration;

use livetail_core::ClientId;
use livetail_events::Query;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A filter waiting to be installed on the session of `client_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterRequest {
    /// Target client.
    pub client_id: ClientId,
    /// Filter to install.
    pub filter: Query,
    /// Number of times the request has been rescheduled.
    pub attempts: u32,
}

impl FilterRequest {
    /// A fresh request that has not been retried.
    pub fn new(client_id: ClientId, filter: Query) -> Self {
        Self {
            client_id,
            filter,
            attempts: 0,
        }
    }

    /// The same request with the attempt counter advanced.
    #[must_use]
    pub fn next_attempt(self) -> Self {
        Self {
            attempts: self.attempts + 1,
            ..self
        }
    }

    /// Whether another retry is allowed under `max_attempts`.
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }
}

/// Resubmit `request` to `inbox` after `delay`.
///
/// Returns immediately. The timer is abandoned when `shutdown` fires, which is
/// the only way to cancel it.
pub(crate) fn schedule_retry(
    request: FilterRequest,
    delay: Duration,
    inbox: mpsc::UnboundedSender<FilterRequest>,
    shutdown: CancellationToken,
) {
    let _ = tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => {
                trace!(client_id = %request.client_id, "pairing retry cancelled by shutdown");
            }
            () = tokio::time::sleep(delay) => {
                let client_id = request.client_id.clone();
                if inbox.send(request).is_err() {
                    debug!(%client_id, "hub gone, pairing retry discarded");
                }
            }
        }
    });
}
