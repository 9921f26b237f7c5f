//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! Each session runs a writer (outbound queue to socket) and a reader (socket
//! to filter updates). Either side may end the session; both observe the
//! session's done signal, and the connection task waits for the writer to
//! acknowledge before it returns.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use livetail_core::ClientId;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use super::connection::ClientSession;
use super::handler::{Inbound, classify};
use crate::errors::HubError;
use crate::hub::{HubHandle, RemovalReason};
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// Run a websocket session for `client_id` until the connection ends, the
/// session is evicted, or the server shuts down.
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(socket: WebSocket, client_id: ClientId, hub: HubHandle) {
    let (sink, stream) = socket.split();
    let (session, outbound) = hub.open_session(client_id);
    let connection_id = session.connection_id();

    let started = Instant::now();
    info!(%connection_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if let Err(e) = hub.add(Arc::clone(&session)).await {
        warn!(%connection_id, error = %e, "could not register session");
    }

    let writer = tokio::spawn(run_writer(sink, outbound, Arc::clone(&session)));
    run_reader(stream, Arc::clone(&session)).await;

    // Covers shutdown and eviction, where the reader saw the signal instead
    // of raising it. A no-op if the session is already closed.
    let _ = session.close(RemovalReason::Disconnected, None);
    if let Err(e) = writer.await {
        warn!(%connection_id, error = %e, "writer task failed");
    }

    info!(%connection_id, "client disconnected");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Drain the outbound queue onto `sink` until the session is done.
///
/// A failed write is reported and the loop carries on; it is the reader that
/// notices a dead connection. On exit a close frame is sent, best effort.
pub async fn run_writer<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<String>>,
    session: Arc<ClientSession>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            () = session.done() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.as_str().into())).await {
                    debug!(client_id = %session.client_id(), error = %e, "send failed");
                    session.report(HubError::Send {
                        client_id: session.client_id().clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
    if sink.send(Message::Close(None)).await.is_err() {
        trace!(client_id = %session.client_id(), "close frame not sent");
    }
}

/// Apply inbound filter updates until end of stream, a transport error, or
/// the session's done signal.
///
/// Malformed filters are reported and the previous filter is kept. End of
/// stream and transport errors close the session.
pub async fn run_reader<S, E>(mut stream: S, session: Arc<ClientSession>)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            () = session.done() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(message)) => match classify(&message) {
                Inbound::Filter(filter) => {
                    debug!(client_id = %session.client_id(), ?filter, "filter updated");
                    session.set_filter(filter);
                }
                Inbound::Malformed(message) => {
                    warn!(client_id = %session.client_id(), error = %message, "malformed filter");
                    session.report(HubError::Decode {
                        client_id: session.client_id().clone(),
                        message,
                    });
                }
                Inbound::Close => {
                    debug!(client_id = %session.client_id(), "client sent close frame");
                    let _ = session.close(RemovalReason::Disconnected, None);
                    return;
                }
                Inbound::Ignore => {}
            },
            Some(Err(e)) => {
                let error = HubError::Transport {
                    client_id: session.client_id().clone(),
                    message: e.to_string(),
                };
                let _ = session.close(RemovalReason::Disconnected, Some(error));
                return;
            }
            None => {
                let _ = session.close(RemovalReason::Disconnected, None);
                return;
            }
        }
    }
}
