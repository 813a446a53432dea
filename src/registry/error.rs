//! HTTP error mapping for the registry API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::store::StoreError;

/// Handler failures, each mapped to one HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed body or query string.
    #[error("{0}")]
    Validation(String),

    /// Instance or service created without labels.
    #[error("must have at least one label")]
    MissingLabel,

    /// Service created without a label query.
    #[error("must have at least one label query")]
    MissingQuery,

    /// Instance with neither an address nor a node.
    #[error("invalid instance")]
    InvalidInstance,

    /// Entity absent from the store.
    #[error("{0}")]
    NotFound(String),

    /// No route matches the request path.
    #[error("no route for {0}")]
    NoRoute(String),

    /// The route exists but not for this method.
    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// Store unreachable, timed out, or returned garbage.
    #[error("{0}")]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingLabel | ApiError::MissingQuery | ApiError::InvalidInstance => {
                StatusCode::PRECONDITION_FAILED
            }
            ApiError::NotFound(_) | ApiError::NoRoute(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error detail.
    pub error: String,
    /// HTTP status code, repeated.
    pub code: u16,
    /// Canonical reason phrase for the status.
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "registry request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "registry request rejected");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
