//! Upstream pipeline: update feed → store → hub.

use std::sync::Arc;

use livetail_events::{Event, EventStore};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::HubError;
use crate::hub::{HubHandle, relay};
use crate::metrics::PIPELINE_EVENTS_TOTAL;

/// Persists every event from the update feed and broadcasts the stored
/// version.
pub struct UpdatePipeline {
    feed: mpsc::Receiver<Event>,
    store: Arc<dyn EventStore>,
    hub: HubHandle,
    errors: mpsc::Sender<HubError>,
}

impl UpdatePipeline {
    /// Wire a pipeline. `errors` is the process error channel.
    pub fn new(
        feed: mpsc::Receiver<Event>,
        store: Arc<dyn EventStore>,
        hub: HubHandle,
        errors: mpsc::Sender<HubError>,
    ) -> Self {
        Self {
            feed,
            store,
            hub,
            errors,
        }
    }

    /// Run on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Consume the feed until shutdown.
    ///
    /// A store failure is reported and the event skipped. The feed closing
    /// while not shutting down is hub-fatal: it is reported as
    /// [`HubError::FeedClosed`] and the pipeline ends.
    #[instrument(skip_all, name = "pipeline")]
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                next = self.feed.recv() => next,
            };
            let Some(event) = next else {
                if !shutdown.is_cancelled() {
                    error!("upstream event feed closed");
                    self.report_fatal(HubError::FeedClosed, &shutdown).await;
                }
                break;
            };

            let stored = match self.store.save(event) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "failed to persist event");
                    relay(&self.errors, HubError::Store(e));
                    continue;
                }
            };
            counter!(PIPELINE_EVENTS_TOTAL).increment(1);
            debug!(id = stored.id, key = %stored.key, "event persisted");

            if let Err(e) = self.hub.broadcast(stored).await {
                self.report_fatal(e, &shutdown).await;
                break;
            }
        }
        info!("pipeline stopped");
    }

    /// Deliver a pipeline-ending error, waiting for room on the error
    /// channel. Only shutdown or a closed channel gives up on it.
    async fn report_fatal(&self, error: HubError, shutdown: &CancellationToken) {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => debug!("shutting down, fatal error not reported"),
            sent = self.errors.send(error) => {
                if let Err(e) = sent {
                    warn!(error = %e.0, "process error channel closed, dropping error");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub;
    use assert_matches::assert_matches;
    use livetail_core::ClientId;
    use livetail_events::{MemoryStore, Query};

    struct Fixture {
        feed: mpsc::Sender<Event>,
        store: Arc<MemoryStore>,
        hub: HubHandle,
        errors: mpsc::Receiver<HubError>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    }

    fn fixture() -> Fixture {
        let shutdown = CancellationToken::new();
        let (err_tx, errors) = mpsc::channel(16);
        let (hub, _hub_task) = hub::spawn(HubConfig::default(), err_tx.clone(), shutdown.clone());
        let (feed, feed_rx) = mpsc::channel(16);
        let store = Arc::new(MemoryStore::new());
        let task = UpdatePipeline::new(feed_rx, store.clone(), hub.clone(), err_tx)
            .spawn(shutdown.clone());
        Fixture {
            feed,
            store,
            hub,
            errors,
            shutdown,
            task,
        }
    }

    #[tokio::test]
    async fn persists_then_broadcasts_stored_version() {
        let f = fixture();
        let (session, mut rx) = f.hub.open_session(ClientId::from("abc"));
        session.set_filter(Query::entities(["user/foo"]));
        f.hub.add(session).await.unwrap();
        let _ = f.hub.clients().await.unwrap();

        f.feed
            .send(Event::new("app.login", "d", 1, "app").with_entities(["user/foo"]))
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        let delivered: Event = serde_json::from_str(&frame).unwrap();
        assert_eq!(delivered.id, 1);
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_reported_and_skipped() {
        let mut f = fixture();
        let mut missing = Event::new("k", "d", 0, "o");
        missing.id = 42;
        f.feed.send(missing).await.unwrap();
        assert_matches!(f.errors.recv().await, Some(HubError::Store(_)));

        f.feed.send(Event::new("k", "d", 0, "o")).await.unwrap();
        let _ = f.hub.clients().await.unwrap();
        tokio::task::yield_now().await;
        assert!(!f.task.is_finished());
    }

    #[tokio::test]
    async fn closed_feed_is_reported() {
        let Fixture {
            feed,
            mut errors,
            task,
            ..
        } = fixture();
        drop(feed);
        task.await.unwrap();
        assert_matches!(errors.recv().await, Some(HubError::FeedClosed));
    }

    #[tokio::test]
    async fn closed_feed_waits_for_room_on_a_full_error_channel() {
        let shutdown = CancellationToken::new();
        let (hub_errors, _hub_errors_rx) = mpsc::channel(16);
        let (hub, _hub_task) = hub::spawn(HubConfig::default(), hub_errors, shutdown.clone());
        let (err_tx, mut errors) = mpsc::channel(1);
        err_tx
            .try_send(HubError::Overflow(ClientId::from("slow")))
            .unwrap();

        let (feed, feed_rx) = mpsc::channel(1);
        let task = UpdatePipeline::new(feed_rx, Arc::new(MemoryStore::new()), hub, err_tx)
            .spawn(shutdown.clone());
        drop(feed);
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        assert_matches!(errors.recv().await, Some(HubError::Overflow(_)));
        assert_matches!(errors.recv().await, Some(HubError::FeedClosed));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_a_blocked_fatal_report() {
        let shutdown = CancellationToken::new();
        let (hub_errors, _hub_errors_rx) = mpsc::channel(16);
        let (hub, _hub_task) = hub::spawn(HubConfig::default(), hub_errors, shutdown.clone());
        let (err_tx, mut errors) = mpsc::channel(1);
        err_tx
            .try_send(HubError::Overflow(ClientId::from("slow")))
            .unwrap();

        let (feed, feed_rx) = mpsc::channel(1);
        let task = UpdatePipeline::new(feed_rx, Arc::new(MemoryStore::new()), hub, err_tx)
            .spawn(shutdown.clone());
        drop(feed);
        tokio::task::yield_now().await;

        shutdown.cancel();
        task.await.unwrap();
        assert_matches!(errors.recv().await, Some(HubError::Overflow(_)));
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_is_not_an_error() {
        let Fixture {
            mut errors,
            shutdown,
            task,
            ..
        } = fixture();
        shutdown.cancel();
        task.await.unwrap();
        assert!(errors.try_recv().is_err());
    }
}
