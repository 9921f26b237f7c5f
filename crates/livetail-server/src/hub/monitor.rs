//! Hub lifecycle events for external monitoring.

use livetail_core::ClientId;

use crate::websocket::connection::ConnectionId;

/// Something the hub did to its registry or to a pending filter.
///
/// Published on a `tokio::sync::broadcast` channel; slow subscribers lose
/// the oldest events, the hub never waits for them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HubEvent {
    /// A session was added to the registry.
    Registered {
        /// Client id.
        client_id: ClientId,
        /// Connection now reachable under the id.
        connection_id: ConnectionId,
    },
    /// A session replaced an earlier one registered under the same id. The
    /// earlier session is not torn down, it just stops receiving events.
    Superseded {
        /// Client id.
        client_id: ClientId,
        /// Connection that is no longer reachable.
        previous: ConnectionId,
        /// Connection that took its place.
        current: ConnectionId,
    },
    /// A session left the registry after disconnecting.
    Removed {
        /// Client id.
        client_id: ClientId,
        /// Removed connection.
        connection_id: ConnectionId,
    },
    /// A session left the registry because its outbound queue overflowed.
    Evicted {
        /// Client id.
        client_id: ClientId,
        /// Evicted connection.
        connection_id: ConnectionId,
    },
    /// A submitted filter was installed on a live session.
    FilterPaired {
        /// Client id.
        client_id: ClientId,
        /// Retries it took.
        attempts: u32,
    },
    /// No session was registered yet; the filter was rescheduled.
    FilterRequeued {
        /// Client id.
        client_id: ClientId,
        /// Attempt count carried by the rescheduled request.
        attempts: u32,
    },
    /// The retry budget ran out and the filter was discarded.
    FilterDropped {
        /// Client id.
        client_id: ClientId,
        /// Retries spent.
        attempts: u32,
    },
}

impl HubEvent {
    /// Client the event concerns.
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Registered { client_id, .. }
            | Self::Superseded { client_id, .. }
            | Self::Removed { client_id, .. }
            | Self::Evicted { client_id, .. }
            | Self::FilterPaired { client_id, .. }
            | Self::FilterRequeued { client_id, .. }
            | Self::FilterDropped { client_id, .. } => client_id,
        }
    }
}
