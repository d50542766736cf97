//! Gateway error type. Every variant renders as `{"error": message}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docsearch_core::{IndexError, NormalizeError, StoreError};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// Bad client input (400). Never worth retrying unchanged.
    Validation(String),
    /// No such document (404).
    NotFound(String),
    /// Store, normalizer or index unreachable (500). Retrying the request is safe.
    DependencyUnavailable(String),
    /// A store or index write failed part way (500).
    Write(String),
    /// The query could not be evaluated (500).
    Query(String),
    /// Unexpected server error (500).
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DependencyUnavailable(_)
            | ApiError::Write(_)
            | ApiError::Query(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(self) -> String {
        match self {
            ApiError::Validation(m)
            | ApiError::NotFound(m)
            | ApiError::DependencyUnavailable(m)
            | ApiError::Write(m)
            | ApiError::Query(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = axum::Json(json!({ "error": self.message() }));
        (status, body).into_response()
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        let msg = e.to_string();
        match e {
            IndexError::InvalidQuery(_) => ApiError::Validation(msg),
            IndexError::Unavailable => ApiError::DependencyUnavailable(msg),
            IndexError::Write(_) | IndexError::AlreadyExists(_) => ApiError::Write(msg),
            IndexError::Read(_) | IndexError::Corrupt { .. } => ApiError::Query(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let msg = e.to_string();
        match e {
            StoreError::Write(_) => ApiError::Write(msg),
            StoreError::Unavailable(_) | StoreError::Read(_) => ApiError::DependencyUnavailable(msg),
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(e: NormalizeError) -> Self {
        let msg = format!("failed to analyze text: {e}");
        match e {
            NormalizeError::Unavailable(_) => ApiError::DependencyUnavailable(msg),
            // The collaborator answered with garbage; the same request would get the same answer.
            NormalizeError::Malformed(_) => ApiError::Internal(msg),
        }
    }
}
