//! Configuration Module
//!
//! One canonical configuration value for the whole gateway. The binary loads
//! it from environment variables; library components only ever receive a
//! fully resolved `Config`.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

/// Placeholder secret used when `SECRET_KEY` is not provided.
pub const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// A login principal as configured through `GATEWAY_USERS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    /// Login name
    pub username: String,
    /// Scopes granted to tokens issued for this user
    pub scopes: Vec<String>,
    /// Argon2 PHC string
    pub password_hash: String,
}

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Versioned route prefix
    pub api_prefix: String,
    /// Allowed CORS origins (`*` allows any)
    pub cors_origins: Vec<String>,

    /// Shared token signing secret
    pub secret_key: SecretString,
    /// Lifetime of issued access tokens
    pub token_ttl: Duration,
    /// Login principals
    pub users: Vec<UserSpec>,

    /// Requests admitted per window per client
    pub rate_limit_requests: u64,
    /// Window length
    pub rate_limit_period: Duration,
    /// Use the first `X-Forwarded-For` hop as client identity
    pub trust_forwarded_for: bool,

    /// Default TTL for cached responses
    pub cache_default_ttl: Duration,
    /// Capacity of the in-memory store
    pub cache_max_entries: usize,
    /// Namespace prefix for every key the gateway writes
    pub cache_key_prefix: String,
    /// Cache `GET` responses in the pipeline
    pub response_cache_enabled: bool,
    /// Background purge interval for the in-memory store
    pub cleanup_interval: Duration,

    /// Redis URL; in-memory backends are used when absent
    pub redis_url: Option<String>,
    /// Elasticsearch base URL; in-memory index is used when absent
    pub search_url: Option<String>,

    /// Handler invocations per work item before dead-lettering
    pub task_max_attempts: u32,
    /// Base retry delay
    pub task_retry_delay: Duration,
    /// Retry delay cap
    pub task_retry_max_delay: Duration,
    /// Exclusive reservation time for a delivered item
    pub task_lease: Duration,
    /// Idle poll interval of dispatcher workers
    pub task_poll_interval: Duration,
    /// Worker loops per registered work kind
    pub task_workers: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` (default: 8000)
    /// - `API_PREFIX` (default: `/api/v1`)
    /// - `CORS_ORIGINS` - comma separated (default: `*`)
    /// - `SECRET_KEY` - token signing secret
    /// - `ACCESS_TOKEN_EXPIRE_MINUTES` (default: 30)
    /// - `GATEWAY_USERS` - `name:scope scope:$argon2id$...` entries separated by `;`
    /// - `RATE_LIMIT_REQUESTS` (default: 100)
    /// - `RATE_LIMIT_PERIOD` - seconds (default: 60)
    /// - `TRUST_FORWARDED_FOR` (default: false)
    /// - `CACHE_DEFAULT_TTL` - seconds (default: 300)
    /// - `CACHE_MAX_ENTRIES` (default: 10000)
    /// - `CACHE_KEY_PREFIX` (default: `gateway:`)
    /// - `RESPONSE_CACHE_ENABLED` (default: true)
    /// - `CLEANUP_INTERVAL` - seconds (default: 1)
    /// - `REDIS_URL`, `SEARCH_URL` - optional backend addresses
    /// - `TASK_MAX_ATTEMPTS` (default: 3)
    /// - `TASK_RETRY_DELAY` - seconds (default: 60)
    /// - `TASK_RETRY_MAX_DELAY` - seconds (default: 3600)
    /// - `TASK_LEASE_SECS` (default: 300)
    /// - `TASK_POLL_INTERVAL_MS` (default: 250)
    /// - `TASK_WORKERS` (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
            api_prefix: env::var("API_PREFIX").unwrap_or(defaults.api_prefix),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|v| split_list(&v, ','))
                .unwrap_or(defaults.cors_origins),
            secret_key: env::var("SECRET_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
                .unwrap_or(defaults.secret_key),
            token_ttl: parse_env::<u64>("ACCESS_TOKEN_EXPIRE_MINUTES")
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.token_ttl),
            users: env::var("GATEWAY_USERS")
                .map(|v| parse_users(&v))
                .unwrap_or_default(),
            rate_limit_requests: parse_env("RATE_LIMIT_REQUESTS")
                .unwrap_or(defaults.rate_limit_requests),
            rate_limit_period: parse_secs("RATE_LIMIT_PERIOD")
                .unwrap_or(defaults.rate_limit_period),
            trust_forwarded_for: parse_env("TRUST_FORWARDED_FOR")
                .unwrap_or(defaults.trust_forwarded_for),
            cache_default_ttl: parse_secs("CACHE_DEFAULT_TTL")
                .unwrap_or(defaults.cache_default_ttl),
            cache_max_entries: parse_env("CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            cache_key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.cache_key_prefix),
            response_cache_enabled: parse_env("RESPONSE_CACHE_ENABLED")
                .unwrap_or(defaults.response_cache_enabled),
            cleanup_interval: parse_secs("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            search_url: env::var("SEARCH_URL").ok().filter(|v| !v.is_empty()),
            task_max_attempts: parse_env("TASK_MAX_ATTEMPTS")
                .unwrap_or(defaults.task_max_attempts),
            task_retry_delay: parse_secs("TASK_RETRY_DELAY").unwrap_or(defaults.task_retry_delay),
            task_retry_max_delay: parse_secs("TASK_RETRY_MAX_DELAY")
                .unwrap_or(defaults.task_retry_max_delay),
            task_lease: parse_secs("TASK_LEASE_SECS").unwrap_or(defaults.task_lease),
            task_poll_interval: parse_env::<u64>("TASK_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.task_poll_interval),
            task_workers: parse_env("TASK_WORKERS").unwrap_or(defaults.task_workers),
        }
    }

    /// Whether the signing secret is still the placeholder.
    pub fn uses_insecure_secret(&self) -> bool {
        self.secret_key.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 8000,
            api_prefix: "/api/v1".to_string(),
            cors_origins: vec!["*".to_string()],
            secret_key: SecretString::from(INSECURE_DEFAULT_SECRET.to_string()),
            token_ttl: Duration::from_secs(30 * 60),
            users: Vec::new(),
            rate_limit_requests: 100,
            rate_limit_period: Duration::from_secs(60),
            trust_forwarded_for: false,
            cache_default_ttl: Duration::from_secs(300),
            cache_max_entries: 10_000,
            cache_key_prefix: "gateway:".to_string(),
            response_cache_enabled: true,
            cleanup_interval: Duration::from_secs(1),
            redis_url: None,
            search_url: None,
            task_max_attempts: 3,
            task_retry_delay: Duration::from_secs(60),
            task_retry_max_delay: Duration::from_secs(3600),
            task_lease: Duration::from_secs(300),
            task_poll_interval: Duration::from_millis(250),
            task_workers: 2,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_port", &self.server_port)
            .field("api_prefix", &self.api_prefix)
            .field("cors_origins", &self.cors_origins)
            .field("secret_key", &"[REDACTED]")
            .field("token_ttl", &self.token_ttl)
            .field("users", &format!("[{} users]", self.users.len()))
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_period", &self.rate_limit_period)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("cache_default_ttl", &self.cache_default_ttl)
            .field("cache_max_entries", &self.cache_max_entries)
            .field("cache_key_prefix", &self.cache_key_prefix)
            .field("response_cache_enabled", &self.response_cache_enabled)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[SET]"))
            .field("search_url", &self.search_url)
            .field("task_max_attempts", &self.task_max_attempts)
            .field("task_retry_delay", &self.task_retry_delay)
            .field("task_lease", &self.task_lease)
            .field("task_workers", &self.task_workers)
            .finish()
    }
}

// == Parsing Helpers ==
fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_secs(name: &str) -> Option<Duration> {
    parse_env::<u64>(name).map(Duration::from_secs)
}

fn split_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `name:scope scope:hash` entries separated by `;`.
///
/// Entries without a hash are skipped.
pub fn parse_users(value: &str) -> Vec<UserSpec> {
    value
        .split(';')
        .filter_map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            let username = parts.next()?.trim();
            let scopes = parts.next()?;
            let password_hash = parts.next()?.trim();
            if username.is_empty() || password_hash.is_empty() {
                return None;
            }
            Some(UserSpec {
                username: username.to_string(),
                scopes: scopes.split_whitespace().map(str::to_string).collect(),
                password_hash: password_hash.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.api_prefix, "/api/v1");
        assert_eq!(config.rate_limit_requests, 100);
        assert_eq!(config.rate_limit_period, Duration::from_secs(60));
        assert_eq!(config.token_ttl, Duration::from_secs(1800));
        assert_eq!(config.task_max_attempts, 3);
        assert!(config.uses_insecure_secret());
    }

    #[test]
    fn test_parse_users() {
        let users = parse_users(
            "alice:read write:$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA; bob::$argon2id$x",
        );
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].scopes, vec!["read", "write"]);
        assert!(users[0].password_hash.starts_with("$argon2id$v=19$m=19456,t=2,p=1"));
        assert!(users[1].scopes.is_empty());
    }

    #[test]
    fn test_parse_users_skips_incomplete_entries() {
        let users = parse_users("carol;dave:read;:read:hash");
        assert!(users.is_empty());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = Config {
            secret_key: SecretString::from("super-secret-value".to_string()),
            ..Config::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("http://a, http://b ,", ','),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
    }
}
