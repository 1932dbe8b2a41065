//! Request Pipeline Module
//!
//! Authenticator, rate limiter, response cache and metrics applied
//! uniformly to inbound requests as one axum middleware.

mod middleware;
mod policy;
mod response_cache;
mod state;

pub use middleware::{gateway_pipeline, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET};
pub use policy::{client_identity, RoutePolicy};
pub use response_cache::{cache_key, CachedResponse, CACHE_STATUS_HEADER};
pub use state::{PipelineState, PipelineTrace};
