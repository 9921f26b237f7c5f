//! REST handlers over the event store.
//!
//! Queries issued under a client id are also submitted to the hub as that
//! client's streaming filter, so a live connection follows what its owner
//! last looked at. Writes are pushed onto the update feed; the pipeline
//! persists and broadcasts them.

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use livetail_events::{AggregateField, Event, Query};
use tracing::debug;

use super::JsonBody;
use super::errors::ApiError;
use super::identity::ClientIdentity;
use crate::server::AppState;
use crate::websocket::session::run_ws_session;

type Pairs = UrlQuery<Vec<(String, String)>>;

/// `GET {prefix}/{entity}/{id}/`: events referencing `entity/id`.
pub async fn entity_handler(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    UrlQuery(pairs): Pairs,
    identity: ClientIdentity,
) -> Result<impl IntoResponse, ApiError> {
    if entity.is_empty() || id.is_empty() {
        return Err(ApiError::BadRequest("Invalid entity".into()));
    }
    let mut query = Query::from_pairs(pairs)?;
    query.entities.push(format!("{entity}/{id}"));
    let events = state.store.query(&query)?;
    state.hub.submit_filter(identity.id.clone(), query);
    Ok((identity, JsonBody(events)))
}

/// `GET {prefix}/{id}/`: a single event.
pub async fn retrieve_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<JsonBody<Event>, ApiError> {
    let id = parse_id(&id)?;
    Ok(JsonBody(state.store.get_by_id(id)?))
}

/// `POST {prefix}/`: accept a new event.
pub async fn create_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event = parse_event(&body)?;
    if event.is_saved() {
        return Err(ApiError::save_existing());
    }
    push(&state, event).await?;
    Ok(StatusCode::CREATED)
}

/// `PUT {prefix}/{id}/`: accept an update to a saved event.
pub async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let event = parse_event(&body)?;
    if !event.is_saved() {
        return Err(ApiError::update_non_existing());
    }
    if event.id != id {
        return Err(ApiError::BadRequest(format!(
            "body id {} does not match path id {id}",
            event.id
        )));
    }
    push(&state, event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET {prefix}/search`: events matching the URL query.
pub async fn search_handler(
    State(state): State<AppState>,
    UrlQuery(pairs): Pairs,
    identity: ClientIdentity,
) -> Result<impl IntoResponse, ApiError> {
    let query = Query::from_pairs(pairs)?;
    let events = state.store.query(&query)?;
    state.hub.submit_filter(identity.id.clone(), query);
    Ok((identity, JsonBody(events)))
}

/// `GET {prefix}/aggregate/{type}`: value counts of one attribute.
pub async fn aggregate_handler(
    State(state): State<AppState>,
    Path(field): Path<String>,
    UrlQuery(pairs): Pairs,
) -> Result<impl IntoResponse, ApiError> {
    let field: AggregateField = field.parse()?;
    let query = Query::from_pairs(pairs)?;
    Ok(JsonBody(state.store.aggregate_type(&query, field)?))
}

/// `GET {prefix}/ws`: upgrade to a streaming session for the caller.
pub async fn ws_handler(
    State(state): State<AppState>,
    identity: ClientIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = identity.id.clone();
    let hub = state.hub.clone();
    let upgrade = ws
        .max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, client_id, hub));
    (identity, upgrade).into_response()
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid id `{raw}`: {e}")))
}

fn parse_event(body: &[u8]) -> Result<Event, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn push(state: &AppState, event: Event) -> Result<(), ApiError> {
    debug!(id = event.id, key = %event.key, "queueing event update");
    state
        .feed
        .send(event)
        .await
        .map_err(|_| ApiError::Unavailable("update feed closed".into()))
}
