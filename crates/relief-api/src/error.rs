//! Error types for the coordination API.
//!
//! [`ApiError`] unifies store, query, and upstream failures into a single
//! enum that converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relief_core::QueryError;
use relief_db::StoreError;

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The addressed record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A query parameter is malformed or out of range.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A UUID could not be parsed from the request path.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    /// The request body was refused.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The image verification service failed.
    #[error("verification upstream error: {0}")]
    Upstream(String),

    /// The record store or cache failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// A mutation task ended without producing a result.
    #[error("internal error: {0}")]
    Internal(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Rejected(msg) => Self::Rejected(msg),
            other => Self::Store(other),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidQuery(msg) => Self::InvalidQuery(msg),
        }
    }
}

impl ApiError {
    /// HTTP status this error maps to.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidQuery(_) | Self::InvalidUuid(_) | Self::Rejected(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Internal(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::NotFound(msg)
            | Self::InvalidQuery(msg)
            | Self::InvalidUuid(msg)
            | Self::Rejected(msg)
            | Self::Upstream(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Store(e) => {
                tracing::error!(error = %e, "Store failure");
                e.to_string()
            }
            Self::Serialization(e) => format!("JSON error: {e}"),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let missing = ApiError::from(StoreError::NotFound(String::from("disaster x")));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let rejected = ApiError::from(StoreError::Rejected(String::from("lat out of range")));
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let down = ApiError::from(StoreError::Unavailable(String::from("switched off")));
        assert_eq!(down.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_query_is_bad_request() {
        let err = ApiError::from(QueryError::InvalidQuery(String::from("lat 200")));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Upstream(String::new()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::Internal(String::new()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
