//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Sessions currently in the hub registry (gauge).
pub const HUB_SESSIONS_REGISTERED: &str = "hub_sessions_registered";
/// Events processed by the hub (counter).
pub const HUB_BROADCAST_EVENTS_TOTAL: &str = "hub_broadcast_events_total";
/// Frames queued to sessions (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Sessions evicted for overflowing their queue (counter).
pub const HUB_EVICTIONS_TOTAL: &str = "hub_evictions_total";
/// Registrations that replaced a live session (counter).
pub const HUB_SUPERSEDED_TOTAL: &str = "hub_superseded_total";
/// Filter pairing retries scheduled (counter).
pub const PAIRING_RETRIES_TOTAL: &str = "pairing_retries_total";
/// Filters dropped after the retry budget (counter).
pub const PAIRING_DROPPED_TOTAL: &str = "pairing_dropped_total";
/// Filters installed on a live session (counter).
pub const PAIRING_MATCHED_TOTAL: &str = "pairing_matched_total";
/// Events persisted by the upstream pipeline (counter).
pub const PIPELINE_EVENTS_TOTAL: &str = "pipeline_events_total";
