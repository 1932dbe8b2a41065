//! API Handlers
//!
//! HTTP request handlers for each gateway endpoint. Authentication, rate
//! limiting and response caching have already run in the pipeline by the
//! time a handler is called. Body and query extraction failures are turned
//! into `Error::InvalidRequest` so they render like every other error.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use tracing::{info, warn};

use crate::auth::Credential;
use crate::dispatch::DeadLetter;
use crate::error::{Error, Result};
use crate::models::{
    DeadLetterQuery, EnqueueRequest, EnqueueResponse, HealthResponse, LoginRequest,
    ProtectedResponse, SearchParams, SearchResponse, TokenResponse,
};

use super::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.clock.now()))
}

/// Handler for GET /metrics
///
/// Prometheus text exposition of the gateway's own registry.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.export(),
    )
}

/// Handler for POST /login
///
/// Password verification is CPU-bound and runs on the blocking pool.
pub async fn login_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>> {
    let Json(req) = payload?;
    if let Some(error_msg) = req.validate() {
        return Err(Error::InvalidRequest(error_msg));
    }

    let users = state.users.clone();
    let authenticator = state.authenticator.clone();
    let issued = tokio::task::spawn_blocking(move || {
        users.login(&authenticator, &req.username, &req.password)
    })
    .await
    .map_err(|e| Error::Internal(format!("Login task failed: {}", e)))??;

    info!(subject = %issued.credential.subject, "Issued access token");
    Ok(Json(TokenResponse::from(issued)))
}

/// Handler for GET /protected
pub async fn protected_handler(
    Extension(credential): Extension<Credential>,
) -> Json<ProtectedResponse> {
    Json(ProtectedResponse::for_credential(&credential))
}

/// Handler for POST /tasks
///
/// Returns `202 Accepted` once the broker holds the item. Handler failures
/// happen later and are never reported to this caller.
pub async fn enqueue_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    let Json(req) = payload?;
    if let Some(error_msg) = req.validate() {
        return Err(Error::InvalidRequest(error_msg));
    }

    let id = state.dispatcher.enqueue(&req.kind, req.payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse { id, kind: req.kind }),
    ))
}

/// Handler for GET /tasks/dead-letters
pub async fn dead_letters_handler(
    State(state): State<AppState>,
    query: std::result::Result<Query<DeadLetterQuery>, QueryRejection>,
) -> Result<Json<Vec<DeadLetter>>> {
    let Query(query) = query?;
    let letters = state
        .dispatcher
        .dead_letters(query.kind.as_deref(), query.limit())
        .await?;
    Ok(Json(letters))
}

/// Handler for GET /search
///
/// An unreachable search backend yields an empty, `degraded` result rather
/// than an error.
pub async fn search_handler(
    State(state): State<AppState>,
    params: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>> {
    let Query(params) = params?;
    if let Some(error_msg) = params.validate() {
        return Err(Error::InvalidRequest(error_msg));
    }

    let query = params.to_query();
    let (hits, degraded) = match state.search.search(&params.index, &query).await {
        Ok(hits) => (hits, false),
        Err(Error::SearchUnavailable(reason)) => {
            warn!(index = %params.index, reason = %reason, "Search backend unavailable, returning empty result");
            (Vec::new(), true)
        }
        Err(e) => return Err(e),
    };

    Ok(Json(SearchResponse {
        hits,
        page: query.page(),
        page_size: query.page_size(),
        degraded,
    }))
}
