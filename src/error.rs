//! Error types for the gateway
//!
//! Provides unified error handling using thiserror. Every error renders as a
//! JSON body of the form `{"message": ..., "details": {...}}`.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ErrorResponse;

// == Gateway Error Enum ==
/// Unified error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, malformed, expired or badly signed credential
    #[error("Authentication required")]
    AuthInvalid,

    /// Fixed-window limit reached for the client identity
    #[error("Too many requests, retry after {retry_after_secs}s")]
    RateLimited {
        limit: u64,
        reset_at: Option<DateTime<Utc>>,
        retry_after_secs: u64,
    },

    /// Key-value backend could not be reached
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Broker/queue backend could not accept or hand out work
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Work item exhausted its attempts or was rejected by its handler
    #[error("Task {id} ({kind}) failed permanently after {attempts} attempt(s): {reason}")]
    TaskPermanentFailure {
        id: Uuid,
        kind: String,
        attempts: u32,
        reason: String,
    },

    /// Search backend could not be reached
    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    /// Search backend refused the request (bad document, missing index)
    #[error("Search request rejected: {0}")]
    SearchRejected(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::AuthInvalid => StatusCode::UNAUTHORIZED,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::CacheUnavailable(_)
            | Error::BrokerUnavailable(_)
            | Error::SearchUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::SearchRejected(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::TaskPermanentFailure { .. } | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a retry of the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::CacheUnavailable(_) | Error::BrokerUnavailable(_) | Error::SearchUnavailable(_)
        )
    }

    fn details(&self) -> Value {
        match self {
            Error::RateLimited {
                limit,
                reset_at,
                retry_after_secs,
            } => json!({
                "limit": limit,
                "reset_at": reset_at.map(|t| t.to_rfc3339()),
                "retry_after_secs": retry_after_secs,
            }),
            Error::TaskPermanentFailure {
                id, kind, attempts, ..
            } => json!({ "id": id, "kind": kind, "attempts": attempts }),
            _ => json!({}),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse::new(self.to_string(), self.details()));

        let mut response = (status, body).into_response();
        match &self {
            Error::AuthInvalid => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            Error::RateLimited {
                retry_after_secs, ..
            } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }
        response
    }
}

// == Backend Conversions ==
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidRequest(format!("JSON error: {}", err))
    }
}

// == Extractor Rejections ==
impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the gateway.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::AuthInvalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::RateLimited {
                limit: 1,
                reset_at: None,
                retry_after_secs: 3
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::BrokerUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::InvalidRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = Error::RateLimited {
            limit: 10,
            reset_at: None,
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_auth_invalid_response_has_challenge() {
        let response = Error::AuthInvalid.into_response();
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::SearchUnavailable("timeout".into()).is_transient());
        assert!(!Error::SearchRejected("mapping".into()).is_transient());
        assert!(!Error::AuthInvalid.is_transient());
    }

    #[test]
    fn test_extractor_rejections_become_invalid_request() {
        let rejection = axum::Json::<serde_json::Value>::from_bytes(b"{\"open\":")
            .err()
            .unwrap();
        let err = Error::from(rejection);
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        #[derive(Debug, serde::Deserialize)]
        struct Paging {
            #[allow(dead_code)]
            page: usize,
        }
        let uri: axum::http::Uri = "/search?page=first".parse().unwrap();
        let rejection = axum::extract::Query::<Paging>::try_from_uri(&uri).unwrap_err();
        assert!(matches!(Error::from(rejection), Error::InvalidRequest(_)));
    }
}
