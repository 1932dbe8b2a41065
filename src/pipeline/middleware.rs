//! Gateway pipeline middleware
//!
//! Runs authentication, rate limiting, the response cache and metrics
//! around every routed request. Rejections short-circuit the handler but
//! still pass through the responding stage.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::{to_bytes, Body, HttpBody},
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::error::Error;
use crate::pipeline::policy::client_identity;
use crate::pipeline::response_cache::{
    cache_key, is_storable, mark, CachedResponse, MAX_CACHEABLE_BODY,
};
use crate::pipeline::state::{PipelineState, PipelineTrace};
use crate::ratelimit::RateLimitStatus;

const UNMATCHED_ROUTE: &str = "unmatched";

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Axum middleware implementing the gateway pipeline.
///
/// Install with `axum::middleware::from_fn_with_state`.
pub async fn gateway_pipeline(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let mut trace = PipelineTrace::new();

    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    let request_bytes = request_size(&request);
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let identity = client_identity(request.headers(), peer, state.config.trust_forwarded_for);

    let (mut response, rate) = run_stages(&state, &mut trace, request, next, &identity).await;

    // == Responding ==
    trace.advance(PipelineState::Responding);
    if let Some(rate) = rate {
        apply_rate_limit_headers(response.headers_mut(), &rate);
    }
    apply_security_headers(response.headers_mut());

    let response_bytes = response.body().size_hint().exact().unwrap_or(0);
    state.metrics.observe(
        method.as_str(),
        &route,
        response.status().as_u16(),
        started.elapsed(),
        request_bytes,
        response_bytes,
    );
    trace.advance(PipelineState::Done);

    debug!(
        method = %method,
        route = %route,
        identity = %identity,
        status = response.status().as_u16(),
        rejected = ?trace.rejected(),
        "Request completed"
    );
    response
}

async fn run_stages(
    state: &AppState,
    trace: &mut PipelineTrace,
    mut request: Request,
    next: Next,
    identity: &str,
) -> (Response, Option<RateLimitStatus>) {
    // == Authenticating ==
    let mut subject = None;
    if !state.policy.is_public(request.uri().path()) {
        trace.advance(PipelineState::Authenticating);
        match state.authenticator.authenticate(request.headers()) {
            Some(credential) => {
                subject = Some(credential.subject.clone());
                request.extensions_mut().insert(credential);
            }
            None => {
                trace.advance(PipelineState::Rejected(401));
                state.metrics.record_rejection("auth");
                return (Error::AuthInvalid.into_response(), None);
            }
        }
    }

    // == Rate Checking ==
    trace.advance(PipelineState::RateChecking);
    let rate = match state.limiter.check(identity).await {
        Ok(status) if status.limited => {
            trace.advance(PipelineState::Rejected(429));
            state.metrics.record_rejection("rate_limited");
            return (status.to_error(state.clock.now()).into_response(), None);
        }
        Ok(status) => Some(status),
        Err(e) => {
            warn!(identity = %identity, error = %e, "Rate limiter unavailable, admitting request");
            None
        }
    };

    // == Handling ==
    trace.advance(PipelineState::Handling);
    let response = handle(state, request, next, subject.as_deref()).await;
    (response, rate)
}

async fn handle(state: &AppState, request: Request, next: Next, subject: Option<&str>) -> Response {
    let cacheable = state.config.response_cache_enabled
        && request.method() == Method::GET
        && state.policy.is_cacheable(request.uri().path())
        && !bypasses_cache(request.headers());
    if !cacheable {
        return next.run(request).await;
    }

    let key = cache_key(request.method(), request.uri(), subject);
    match state.cache.get_json::<CachedResponse>(&key).await {
        Ok(Some(cached)) => {
            state.metrics.record_cache_lookup(true);
            return cached.into_response();
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "Response cache read failed, continuing uncached"),
    }
    state.metrics.record_cache_lookup(false);

    let response = next.run(request).await;
    let mut response = if is_storable(&response) {
        store_response(state, &key, response).await
    } else {
        response
    };
    mark(&mut response, false);
    response
}

async fn store_response(state: &AppState, key: &str, response: Response) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_CACHEABLE_BODY as usize).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Error::Internal(format!("Failed to read response body: {}", e))
                .into_response()
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let cached = CachedResponse {
            content_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body: text.to_string(),
        };
        if let Err(e) = state
            .cache
            .set_json(key, &cached, Some(state.config.cache_default_ttl))
            .await
        {
            warn!(key = %key, error = %e, "Response cache write failed");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn bypasses_cache(headers: &HeaderMap) -> bool {
    headers
        .get(header::CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("no-cache") || value.contains("no-store"))
}

fn request_size(request: &Request) -> u64 {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| request.body().size_hint().exact())
        .unwrap_or(0)
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, rate: &RateLimitStatus) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(rate.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(rate.remaining));
    if let Some(reset_at) = rate.reset_at {
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_at.timestamp()));
    }
}

fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_headers() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers);
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        let reset_at = chrono::DateTime::from_timestamp(1_700_000_060, 0);
        apply_rate_limit_headers(
            &mut headers,
            &RateLimitStatus {
                limited: false,
                limit: 100,
                remaining: 42,
                reset_at,
            },
        );
        assert_eq!(headers[RATE_LIMIT_LIMIT], "100");
        assert_eq!(headers[RATE_LIMIT_REMAINING], "42");
        assert_eq!(headers[RATE_LIMIT_RESET], "1700000060");
    }

    #[test]
    fn test_cache_bypass_directive() {
        let mut headers = HeaderMap::new();
        assert!(!bypasses_cache(&headers));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert!(bypasses_cache(&headers));
    }
}
