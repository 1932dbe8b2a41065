//! Request DTOs for the gateway API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

use crate::search::{validate_index_name, SearchQuery};

/// Default number of dead letters returned when no limit is given.
pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;
/// Upper bound on dead letters returned per request.
pub const MAX_DEAD_LETTER_LIMIT: usize = 500;

const DEFAULT_PAGE_SIZE: usize = 10;

/// Request body for `POST /login`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.username.trim().is_empty() {
            return Some("Username cannot be empty".to_string());
        }
        if self.password.is_empty() {
            return Some("Password cannot be empty".to_string());
        }
        None
    }
}

/// Request body for `POST /tasks`
///
/// # Fields
/// - `kind`: Registered task kind, e.g. `process_message`
/// - `payload`: Opaque JSON handed to the task handler
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl EnqueueRequest {
    pub fn validate(&self) -> Option<String> {
        if self.kind.trim().is_empty() {
            return Some("Task kind cannot be empty".to_string());
        }
        None
    }
}

/// Query string for `GET /tasks/dead-letters`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeadLetterQuery {
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

impl DeadLetterQuery {
    /// Requested limit, defaulted and capped.
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
            .clamp(1, MAX_DEAD_LETTER_LIMIT)
    }
}

/// Query string for `GET /search`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub index: String,
    #[serde(default)]
    pub q: String,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl SearchParams {
    pub fn validate(&self) -> Option<String> {
        if self.index.trim().is_empty() {
            return Some("Index cannot be empty".to_string());
        }
        validate_index_name(&self.index).err().map(|e| e.to_string())
    }

    /// Converts the parameters into a backend query; paging is clamped there.
    pub fn to_query(&self) -> SearchQuery {
        SearchQuery::new(self.q.clone()).with_page(
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }
}
