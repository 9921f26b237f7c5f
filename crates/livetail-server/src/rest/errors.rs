//! REST error responses.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use livetail_events::EventStoreError;
use thiserror::Error;
use tracing::warn;

/// Error returned by a REST handler; rendered as a plain-text body with the
/// matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400.
    #[error("{0}")]
    BadRequest(String),
    /// 404.
    #[error("{0}")]
    NotFound(String),
    /// 503: the update feed or hub is gone.
    #[error("{0}")]
    Unavailable(String),
    /// 500.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// POST with a body that already carries an id.
    pub fn save_existing() -> Self {
        Self::BadRequest("Save existing resource".into())
    }

    /// PUT with a body that carries no id.
    pub fn update_non_existing() -> Self {
        Self::BadRequest("Update non-existing resource".into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::EventNotFound(_) => Self::NotFound(err.to_string()),
            EventStoreError::InvalidQuery { .. } | EventStoreError::UnknownField(_) => {
                Self::BadRequest(err.to_string())
            }
            EventStoreError::InvalidOperation(_) => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(status = status.as_u16(), error = %self, "request failed");
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
