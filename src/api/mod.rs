//! API Module
//!
//! HTTP handlers, routing and shared state for the gateway REST API.

pub mod handlers;
pub mod routes;
pub mod state;

pub use handlers::*;
pub use routes::create_router;
pub use state::{AppState, Backends};
