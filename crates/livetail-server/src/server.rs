//! `LivetailServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router};
use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use livetail_events::{Event, EventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{HubError, ServerError};
use crate::health::{self, HealthResponse};
use crate::hub::{self, HubHandle};
use crate::pipeline::UpdatePipeline;
use crate::rest::handlers;
use crate::rest::identity::IdentityResolver;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the broadcast hub.
    pub hub: HubHandle,
    /// Backing event store.
    pub store: Arc<dyn EventStore>,
    /// Update feed consumed by the pipeline.
    pub feed: mpsc::Sender<Event>,
    /// Maps requests to client ids.
    pub identity: Arc<IdentityResolver>,
    /// When the server started.
    pub start_time: Instant,
    /// Max inbound websocket message size.
    pub max_message_size: usize,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for Arc<IdentityResolver> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.identity)
    }
}

/// The livetail server: hub, upstream pipeline and HTTP routes.
pub struct LivetailServer {
    config: ServerConfig,
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LivetailServer {
    /// Create the server and start its hub and pipeline.
    ///
    /// Must be called from within a Tokio runtime. Hub-fatal conditions and
    /// per-session errors are sent to `errors`.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn EventStore>,
        errors: mpsc::Sender<HubError>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, hub_task) = hub::spawn(config.hub.clone(), errors.clone(), shutdown.token());
        let (feed, feed_rx) = mpsc::channel(config.feed_capacity.max(1));
        let pipeline_task = UpdatePipeline::new(feed_rx, Arc::clone(&store), hub.clone(), errors)
            .spawn(shutdown.token());

        let state = AppState {
            hub,
            store,
            feed,
            identity: Arc::new(IdentityResolver::new(&config.identity)),
            start_time: Instant::now(),
            max_message_size: config.max_message_size,
            metrics,
        };
        Self {
            config,
            state,
            shutdown,
            tasks: Mutex::new(vec![hub_task, pipeline_task]),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let p = self.config.api_prefix.trim_end_matches('/');
        let mut router = Router::new()
            .route(&format!("{p}/"), post(handlers::create_handler))
            .route(&format!("{p}/search"), get(handlers::search_handler))
            .route(&format!("{p}/ws"), get(handlers::ws_handler))
            .route(
                &format!("{p}/aggregate/{{type}}"),
                get(handlers::aggregate_handler),
            )
            .route(
                &format!("{p}/{{id}}/"),
                get(handlers::retrieve_handler).put(handlers::update_handler),
            )
            .route(
                &format!("{p}/{{entity}}/{{id}}/"),
                get(handlers::entity_handler),
            )
            .route("/health", get(health_handler));
        if self.state.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        info!(%local, prefix = %self.config.api_prefix, "livetail server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((local, handle))
    }

    /// Cancel everything and wait for the hub and pipeline to finish.
    pub async fn stop(&self, timeout: Option<Duration>) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let _ = self.shutdown.graceful_shutdown(tasks, timeout).await;
    }

    /// Handle to the broadcast hub.
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    /// Sender side of the update feed.
    pub fn feed(&self) -> mpsc::Sender<Event> {
        self.state.feed.clone()
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// How long `/health` waits for the hub to answer a snapshot. The hub serves
/// snapshots after broadcasts, so a busy hub reports as degraded.
const HEALTH_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(1);

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = match tokio::time::timeout(HEALTH_SNAPSHOT_TIMEOUT, state.hub.clients()).await {
        Ok(Ok(ids)) => Some(ids.len()),
        Ok(Err(_)) => None,
        Err(_) => {
            warn!("hub did not answer the health snapshot in time");
            None
        }
    };
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use livetail_events::MemoryStore;
    use tower::ServiceExt;

    fn make_server() -> (LivetailServer, mpsc::Receiver<HubError>) {
        let (tx, rx) = mpsc::channel(16);
        let server = LivetailServer::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
            tx,
            None,
        );
        (server, rx)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-user-id", "abc")
            .body(Body::empty())
            .unwrap()
    }

    fn json_req(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (server, _rx) = make_server();
        let (status, body) = send(server.router(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_after_stop_is_degraded() {
        let (server, _rx) = make_server();
        server.stop(Some(Duration::from_secs(1))).await;
        let (_, body) = send(server.router(), get_req("/health")).await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "degraded");
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_degraded_when_hub_does_not_answer() {
        let (err_tx, _err_rx) = mpsc::channel(16);
        // Built but never run: snapshot requests queue up unanswered.
        let (hub, _idle) = hub::channel(
            crate::config::HubConfig::default(),
            err_tx,
            tokio_util::sync::CancellationToken::new(),
        );
        let (feed, _feed_rx) = mpsc::channel(1);
        let state = AppState {
            hub,
            store: Arc::new(MemoryStore::new()),
            feed,
            identity: Arc::new(IdentityResolver::new(&crate::config::IdentityConfig::default())),
            start_time: Instant::now(),
            max_message_size: 1024,
            metrics: None,
        };

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.connections, 0);
    }

    #[tokio::test]
    async fn metrics_route_only_with_recorder() {
        let (server, _rx) = make_server();
        let (status, _) = send(server.router(), get_req("/metrics")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_retrieve() {
        let (server, _rx) = make_server();
        let body = serde_json::json!({
            "key": "myapp.user.login",
            "description": "User foobar logged in",
            "importance": 3,
            "origin": "myapp",
            "entities": ["user/foo"],
        });
        let (status, _) = send(server.router(), json_req("POST", "/api/", &body)).await;
        assert_eq!(status, StatusCode::CREATED);

        // The pipeline persists asynchronously.
        let mut found = None;
        for _ in 0..50 {
            let (status, body) = send(server.router(), get_req("/api/1/")).await;
            if status == StatusCode::OK {
                found = Some(body);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let event: Event = serde_json::from_str(&found.unwrap()).unwrap();
        assert_eq!(event.key, "myapp.user.login");
    }

    #[tokio::test]
    async fn create_with_id_is_rejected() {
        let (server, _rx) = make_server();
        let body = serde_json::json!({"id": 5, "key": "k"});
        let (status, text) = send(server.router(), json_req("POST", "/api/", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Save existing resource");
    }

    #[tokio::test]
    async fn update_without_id_is_rejected() {
        let (server, _rx) = make_server();
        let body = serde_json::json!({"key": "k"});
        let (status, text) = send(server.router(), json_req("PUT", "/api/5/", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Update non-existing resource");
    }

    #[tokio::test]
    async fn update_is_accepted() {
        let (server, _rx) = make_server();
        let body = serde_json::json!({"id": 5, "key": "k"});
        let (status, _) = send(server.router(), json_req("PUT", "/api/5/", &body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn update_with_mismatched_id_is_rejected() {
        let (server, _rx) = make_server();
        let body = serde_json::json!({"id": 6, "key": "k"});
        let (status, _) = send(server.router(), json_req("PUT", "/api/5/", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn retrieve_errors() {
        let (server, _rx) = make_server();
        let (status, _) = send(server.router(), get_req("/api/abc/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(server.router(), get_req("/api/99/")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_returns_json_array_and_submits_filter() {
        let (server, _rx) = make_server();
        let mut monitor = server.hub().subscribe();
        let (status, body) =
            send(server.router(), get_req("/api/search?entities=user/foo")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");

        // No session for "abc" yet, so the hub reschedules the filter.
        let event = monitor.recv().await.unwrap();
        assert_eq!(event.client_id().as_str(), "abc");
    }

    #[tokio::test]
    async fn search_content_type_and_cors() {
        let (server, _rx) = make_server();
        let req = Request::builder()
            .uri("/api/search")
            .header(header::ORIGIN, "http://example.com")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        // No header and no cookie: an id is minted and set.
        assert!(resp.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn search_with_bad_importance_is_rejected() {
        let (server, _rx) = make_server();
        let (status, _) = send(server.router(), get_req("/api/search?importance=huge")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn entity_route_filters_by_entity() {
        let (server, _rx) = make_server();
        let feed = server.feed();
        feed.send(Event::new("a", "d", 1, "o").with_entities(["user/foo"]))
            .await
            .unwrap();
        feed.send(Event::new("b", "d", 1, "o").with_entities(["user/bar"]))
            .await
            .unwrap();
        let _ = server.hub().clients().await.unwrap();

        let mut events: Vec<Event> = Vec::new();
        for _ in 0..50 {
            let (_, body) = send(server.router(), get_req("/api/user/bar/")).await;
            events = serde_json::from_str(&body).unwrap();
            if !events.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "b");
    }

    #[tokio::test]
    async fn aggregate_unknown_field_is_rejected() {
        let (server, _rx) = make_server();
        let (status, _) = send(server.router(), get_req("/api/aggregate/color")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(server.router(), get_req("/api/aggregate/tags")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (server, _rx) = make_server();
        let (status, _) = send(server.router(), get_req("/nonexistent")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn custom_prefix() {
        let (tx, _rx) = mpsc::channel(16);
        let config = ServerConfig {
            api_prefix: "/events".into(),
            ..ServerConfig::default()
        };
        let server = LivetailServer::new(config, Arc::new(MemoryStore::new()), tx, None);
        let (status, _) = send(server.router(), get_req("/events/search")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(server.router(), get_req("/api/search")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
