//! REST service over the event store.

pub mod errors;
pub mod handlers;
pub mod identity;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub use errors::ApiError;
pub use identity::{ClientIdentity, IdentityResolver};

/// JSON response with an explicit `charset=utf-8` content type.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<T: Serialize> IntoResponse for JsonBody<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => (
                [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => ApiError::Internal(e.to_string()).into_response(),
        }
    }
}
