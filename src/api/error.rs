//! Error responses shared by all handlers

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::model::trigger::UnknownTrigger;
use crate::queue::QueueError;
use crate::service::cache::CacheError;

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    /// Correlates the response with the server log line
    pub request_id: String,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The agent loop is not accepting triggers (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Queue or key-value store failure (502)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ApiError {
    fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Backend(_) => "backend_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = self.error_type();

        let request_id = Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(%request_id, error_type, status = status.as_u16(), message = %self, "Request failed");
        } else {
            tracing::debug!(%request_id, error_type, status = status.as_u16(), message = %self, "Request rejected");
        }

        HttpResponse::build(status).json(ErrorBody {
            error: error_type,
            message: self.to_string(),
            request_id,
        })
    }
}

impl From<UnknownTrigger> for ApiError {
    fn from(err: UnknownTrigger) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Backend(err.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Backend(err.to_string())
    }
}
