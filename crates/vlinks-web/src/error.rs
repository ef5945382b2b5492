use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use vlinks_storage::{FetchError, StoreError};
use vlinks_sync::{AnalysisError, MatchError, PremiumError};

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("record store configuration missing")]
    NotConfigured,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::NotConfigured | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                error!(detail = %detail, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "success": false, "message": message }))).into_response()
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotConfigured => ApiError::NotConfigured,
            FetchError::NotFound { table, id } => {
                ApiError::NotFound(format!("record {id} not found in {table}"))
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => {
                ApiError::Conflict("Email already registered for waitlist".to_string())
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Validation(msg) => ApiError::BadRequest(msg),
            MatchError::NotFound(msg) => ApiError::NotFound(msg),
            MatchError::Conflict(msg) => ApiError::Conflict(msg),
            MatchError::Store(err) => err.into(),
            MatchError::Upstream(err) => err.into(),
        }
    }
}

impl From<PremiumError> for ApiError {
    fn from(err: PremiumError) -> Self {
        match err {
            PremiumError::Missing(field) => ApiError::BadRequest(format!("{field} is required")),
            PremiumError::Upstream(err) => err.into(),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::NoStartups => {
                ApiError::BadRequest("Invalid startup IDs provided".to_string())
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}
