//! Error types for the hub and the HTTP server.

use livetail_core::ClientId;
use livetail_events::EventStoreError;
use thiserror::Error;

/// Errors raised by sessions, the hub and the upstream pipeline.
///
/// Every variant ends up on the process error channel; none of them stops the
/// hub loop.
#[derive(Debug, Error)]
pub enum HubError {
    /// Writing a frame to a client failed. Non-fatal to the session.
    #[error("send to client {client_id} failed: {message}")]
    Send {
        /// Affected client.
        client_id: ClientId,
        /// Transport error text.
        message: String,
    },

    /// A client sent a filter that could not be decoded. The previous filter
    /// stays in place.
    #[error("malformed filter from client {client_id}: {message}")]
    Decode {
        /// Affected client.
        client_id: ClientId,
        /// Decoder error text.
        message: String,
    },

    /// Reading from a client failed; the session is closed.
    #[error("transport error on client {client_id}: {message}")]
    Transport {
        /// Affected client.
        client_id: ClientId,
        /// Transport error text.
        message: String,
    },

    /// The outbound queue of a client was full; the session was evicted.
    #[error("client {0} is disconnected: outbound queue overflowed")]
    Overflow(ClientId),

    /// The upstream event feed closed while the server was running.
    #[error("upstream event feed closed")]
    FeedClosed,

    /// The hub loop is no longer running.
    #[error("broadcast hub stopped")]
    HubStopped,

    /// Persisting an upstream event failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Errors raised while starting the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listen address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
