//! API Routes
//!
//! Configures the Axum router with all gateway endpoints.

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::handlers::{
    dead_letters_handler, enqueue_handler, health_handler, login_handler, metrics_handler,
    protected_handler, search_handler,
};
use super::state::AppState;
use crate::pipeline::gateway_pipeline;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check (public)
/// - `GET /metrics` - Prometheus metrics (public)
/// - `POST {prefix}/login` - Exchange credentials for a bearer token (public)
/// - `GET {prefix}/protected` - Echo the authenticated identity
/// - `POST {prefix}/tasks` - Enqueue a work item
/// - `GET {prefix}/tasks/dead-letters` - List dead-lettered work items
/// - `GET {prefix}/search` - Query the search backend
///
/// # Middleware
/// - Gateway pipeline: auth, rate limiting, response cache, metrics
/// - CORS: origins from `CORS_ORIGINS`
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/login", post(login_handler))
        .route("/protected", get(protected_handler))
        .route("/tasks", post(enqueue_handler))
        .route("/tasks/dead-letters", get(dead_letters_handler))
        .route("/search", get(search_handler));

    let root = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let prefix = state.config.api_prefix.trim_end_matches('/');
    let router = if prefix.is_empty() {
        root.merge(api)
    } else {
        root.nest(prefix, api)
    };

    router
        .layer(middleware::from_fn_with_state(state.clone(), gateway_pipeline))
        .layer(cors_layer(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::CACHE_STATUS_HEADER;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app(config: Config) -> (Router, AppState) {
        let state = AppState::in_memory(config).unwrap();
        (create_router(state.clone()), state)
    }

    fn bearer(state: &AppState, subject: &str) -> String {
        let issued = state
            .authenticator
            .issue_default(subject, &["read".to_string()])
            .unwrap();
        format!("Bearer {}", issued.token)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app(Config::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_is_public() {
        let (app, _) = create_test_app(Config::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_requires_token() {
        let (app, _) = create_test_app(Config::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/protected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[tokio::test]
    async fn test_protected_with_token() {
        let (app, state) = create_test_app(Config::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/protected")
                    .header(header::AUTHORIZATION, bearer(&state, "alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["subject"], "alice");
    }

    #[tokio::test]
    async fn test_second_get_is_served_from_cache() {
        let (app, state) = create_test_app(Config::default());
        let token = bearer(&state, "alice");

        let request = || {
            Request::builder()
                .uri("/api/v1/protected")
                .header(header::AUTHORIZATION, token.clone())
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.headers()[CACHE_STATUS_HEADER], "MISS");

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()[CACHE_STATUS_HEADER], "HIT");
    }

    #[tokio::test]
    async fn test_enqueue_endpoint_accepts() {
        let (app, state) = create_test_app(Config::default());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks")
                    .header(header::AUTHORIZATION, bearer(&state, "alice"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"kind":"process_message","payload":{"text":"hi"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(!response.headers().contains_key(CACHE_STATUS_HEADER));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_over_limit() {
        let config = Config {
            rate_limit_requests: 2,
            ..Config::default()
        };
        let (app, _) = create_test_app(config);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn test_cors_layer_accepts_explicit_origins() {
        // Building the layer must not panic on a mix of valid and invalid origins.
        let _ = cors_layer(&["https://app.example.com".to_string(), "bad\norigin".to_string()]);
        let _ = cors_layer(&["*".to_string()]);
    }
}
