//! Shutdown coordination.
//!
//! The hub, its pending pairing retries, every session and the HTTP listener
//! all hang off one `CancellationToken`. Sessions get child tokens, so
//! cancelling here reaches every connection without the hub walking its
//! registry.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period used when the caller does not pass one.
const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Owns the server-wide cancellation token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose token is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the hub, the pipeline and the listener.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then give `tasks` until `grace` elapses to finish.
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn graceful_shutdown(&self, tasks: Vec<JoinHandle<()>>, grace: Option<Duration>) -> usize {
        self.shutdown();
        let deadline = Instant::now() + grace.unwrap_or(DEFAULT_GRACE);
        info!(tasks = tasks.len(), "draining background tasks");

        let mut aborted = 0;
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => warn!(error = %e, "background task panicked"),
                Ok(Err(_)) => {}
                Err(_) => {
                    abort.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!(aborted, "grace period elapsed, aborted remaining tasks");
        }
        aborted
    }
}
