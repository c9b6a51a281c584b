use crate::services::identity_service::IdentityError;
use crate::services::lifecycle_service::LifecycleError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn from_identity_ref(err: &IdentityError) -> Self {
        let status = match err {
            IdentityError::UserNotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::EmailTaken(_) => StatusCode::CONFLICT,
            IdentityError::AdminRequired(_) => StatusCode::FORBIDDEN,
            IdentityError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError::new(status, err.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Map lifecycle failures onto the HTTP surface. Illegal transitions and
/// lost races are conflicts the caller must not retry blindly; store
/// failures are 503 so the presentation tier knows a retry may help.
impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let status = match &err {
            LifecycleError::DonationNotFound(_) => StatusCode::NOT_FOUND,
            LifecycleError::UnauthorizedActor { .. } => StatusCode::FORBIDDEN,
            LifecycleError::InvalidTransition { .. } | LifecycleError::ReservationConflict => {
                StatusCode::CONFLICT
            }
            LifecycleError::ExpiryInPast
            | LifecycleError::InvalidContinuationToken
            | LifecycleError::InvalidHistoryFilter => StatusCode::BAD_REQUEST,
            LifecycleError::Identity(inner) => return AppError::from_identity_ref(inner),
            LifecycleError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        AppError::from_identity_ref(&err)
    }
}
