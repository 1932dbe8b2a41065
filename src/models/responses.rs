//! Response DTOs for the gateway API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{Credential, IssuedToken};
use crate::search::SearchHit;

/// Response body for `POST /login`
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always `bearer`
    pub token_type: &'static str,
    /// Seconds until the token expires
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            expires_in: issued.expires_in(),
            expires_at: issued.credential.expires_at,
            access_token: issued.token,
            token_type: "bearer",
        }
    }
}

/// Response body for `GET /protected`
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedResponse {
    pub message: String,
    pub subject: String,
    pub scopes: Vec<String>,
}

impl ProtectedResponse {
    pub fn for_credential(credential: &Credential) -> Self {
        Self {
            message: format!("Hello, {}", credential.subject),
            subject: credential.subject.clone(),
            scopes: credential.scopes.iter().cloned().collect(),
        }
    }
}

/// Response body for `POST /tasks` (202 Accepted)
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub id: Uuid,
    pub kind: String,
}

/// Response body for `GET /search`
///
/// `degraded` is set when the search backend could not be reached and the
/// hits are an empty stand-in.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub page: usize,
    pub page_size: usize,
    pub degraded: bool,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    pub version: &'static str,
}

impl HealthResponse {
    /// Creates a new HealthResponse stamped with `now`
    pub fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: now.to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub message: String,
    pub details: Value,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn credential() -> Credential {
        let issued_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Credential {
            subject: "alice".to_string(),
            scopes: BTreeSet::from(["write".to_string(), "read".to_string()]),
            issued_at,
            expires_at: issued_at + chrono::Duration::minutes(30),
        }
    }

    #[test]
    fn test_token_response_serialize() {
        let resp = TokenResponse::from(IssuedToken {
            token: "abc.def.ghi".to_string(),
            credential: credential(),
        });
        assert_eq!(resp.expires_in, 1800);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["token_type"], "bearer");
        assert_eq!(json["access_token"], "abc.def.ghi");
    }

    #[test]
    fn test_protected_response_lists_sorted_scopes() {
        let resp = ProtectedResponse::for_credential(&credential());
        assert_eq!(resp.subject, "alice");
        assert_eq!(resp.scopes, vec!["read", "write"]);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(Utc::now());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong", serde_json::json!({}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("message"));
        assert!(json.contains("Something went wrong"));
    }
}
