use andamio_common::IndexerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Standard REST error types
#[derive(Debug, Error)]
pub enum RESTError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InternalServerError(String),
}

impl RESTError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RESTError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RESTError::NotFound(_) => StatusCode::NOT_FOUND,
            RESTError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RESTError::BadRequest(msg) => msg,
            RESTError::NotFound(msg) => msg,
            RESTError::InternalServerError(msg) => msg,
        }
    }

    /// Invalid parameter error
    pub fn invalid_param(param_name: &str, reason: impl std::fmt::Display) -> Self {
        RESTError::BadRequest(format!("Invalid {param_name} parameter: {reason}"))
    }

    /// Resource not found error
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        RESTError::NotFound(format!("{what} not found"))
    }
}

impl From<IndexerError> for RESTError {
    fn from(error: IndexerError) -> Self {
        match error {
            IndexerError::NotFound(what) => RESTError::not_found(what),
            IndexerError::Integrity(msg) => RESTError::BadRequest(msg),
            other => RESTError::InternalServerError(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status_code: u16,
    message: &'a str,
}

impl IntoResponse for RESTError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.message());
        }
        let body = ErrorBody {
            status_code: status.as_u16(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
