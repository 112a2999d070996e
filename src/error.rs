use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::models::delivery_attempt::DeliveryAttempt;

pub type Result<T> = std::result::Result<T, Error>;

/// A single provider call that did not succeed.
///
/// `reason` is safe to show to whoever triggered the send; `detail` holds the
/// raw provider response and only ever goes to the logs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub reason: String,
    pub detail: String,
}

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: None,
            detail: reason.clone(),
            reason,
        }
    }

    pub fn with_status(status: u16, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            reason: reason.into(),
            detail: detail.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self::new("provider did not answer in time")
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "provider did not answer in time"
        } else if err.is_connect() {
            "provider is unreachable"
        } else if err.is_decode() {
            "provider returned an unreadable response"
        } else {
            "provider request failed"
        };
        Self {
            status: err.status().map(|s| s.as_u16()),
            reason: reason.to_string(),
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No owning account for {channel} page {page_id}")]
    NoOwningAccount { channel: String, page_id: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Delivery failed: {reason}")]
    DeliveryFailed {
        reason: String,
        attempts: Vec<DeliveryAttempt>,
    },

    #[error("Store persistence failure: {0}")]
    StorePersistence(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, error_message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::MalformedPayload(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Transport(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.reason),
            Error::DeliveryFailed { reason, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Message could not be delivered: {}", reason),
            ),
            Error::StorePersistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Message was delivered but could not be recorded".to_string(),
            ),
            err @ Error::NoOwningAccount { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
            ),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_failure_hides_provider_body() {
        let err = Error::DeliveryFailed {
            reason: "recipient is not reachable on this channel".into(),
            attempts: vec![],
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            Error::MalformedPayload("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Forbidden("x".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::Unauthorized("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::from(sqlx::Error::RowNotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn transport_error_keeps_detail_out_of_display() {
        let err =
            TransportError::with_status(400, "recipient rejected", "{\"error\":{\"code\":551}}");
        assert_eq!(err.to_string(), "recipient rejected");
        assert_eq!(err.status, Some(400));
    }
}
