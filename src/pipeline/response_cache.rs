//! Response cache used while handling `GET` requests.
//!
//! Only `200` responses with a known, bounded, UTF-8 body are stored.

use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderValue, Method, Response, StatusCode, Uri};
use serde::{Deserialize, Serialize};

pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Largest body the response cache will store.
pub const MAX_CACHEABLE_BODY: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content_type: Option<String>,
    pub body: String,
}

impl CachedResponse {
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        if let Some(value) = self
            .content_type
            .and_then(|ct| HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        mark(&mut response, true);
        response
    }
}

/// Key covering method, path, query and the caller's identity.
pub fn cache_key(method: &Method, uri: &Uri, subject: Option<&str>) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!(
        "response:{}:{}:{}",
        method,
        path_and_query,
        subject.unwrap_or("anonymous")
    )
}

/// Whether the response may be buffered and stored.
pub fn is_storable(response: &Response<Body>) -> bool {
    response.status() == StatusCode::OK
        && response
            .body()
            .size_hint()
            .exact()
            .is_some_and(|len| len <= MAX_CACHEABLE_BODY)
}

/// Sets `X-Cache: HIT` or `X-Cache: MISS`.
pub fn mark(response: &mut Response<Body>, hit: bool) {
    let value = if hit { "HIT" } else { "MISS" };
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(value));
}
