//! Route policy and client identity.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::HeaderMap;

const UNKNOWN_CLIENT: &str = "unknown";

/// Which routes skip authentication and which never hit the response cache.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    public_paths: HashSet<String>,
    uncached_prefixes: Vec<String>,
}

impl RoutePolicy {
    /// Policy for a gateway mounted under `api_prefix`: health, metrics and
    /// login are public; health, metrics and task routes are never cached.
    pub fn new(api_prefix: &str) -> Self {
        let prefix = api_prefix.trim_end_matches('/');
        Self {
            public_paths: [
                "/health".to_string(),
                "/metrics".to_string(),
                format!("{}/login", prefix),
            ]
            .into_iter()
            .collect(),
            uncached_prefixes: vec![
                "/health".to_string(),
                "/metrics".to_string(),
                format!("{}/tasks", prefix),
            ],
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.contains(path)
    }

    pub fn is_cacheable(&self, path: &str) -> bool {
        !self
            .uncached_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Resolves the rate-limit identity of a request.
///
/// The first `X-Forwarded-For` hop is used only when `trust_forwarded_for`
/// is set; otherwise the peer address. Without either the identity is
/// `unknown`, which all such clients share.
pub fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
