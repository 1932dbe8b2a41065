//! Application state
//!
//! Every backend is built once at startup and shared through [`AppState`].
//! Nothing in the crate keeps module-level state.

use std::sync::Arc;

use tracing::info;

use crate::auth::{Authenticator, UserDirectory};
use crate::cache::{Cache, KeyValueStore, MemoryStore, RedisStore, WindowCounter};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::dispatch::{
    register_builtin_handlers, Broker, DeadLetterSink, Dispatcher, MemoryBroker,
    MemoryDeadLetterSink, RedisBroker, RedisDeadLetterSink, RetryPolicy,
};
use crate::error::Result;
use crate::events::{EventPublisher, MemoryEventPublisher, RedisEventPublisher};
use crate::metrics::MetricsCollector;
use crate::pipeline::RoutePolicy;
use crate::ratelimit::RateLimiter;
use crate::search::{ElasticsearchClient, MemorySearchIndex, SearchBackend};

// == Backends ==
/// The external collaborators behind the gateway's ports.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn KeyValueStore>,
    pub counter: Arc<dyn WindowCounter>,
    pub broker: Arc<dyn Broker>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub search: Arc<dyn SearchBackend>,
    pub events: Arc<dyn EventPublisher>,
    /// Set when the key-value store is in memory and needs purging
    pub memory_store: Option<Arc<MemoryStore>>,
}

impl Backends {
    /// Process-local backends for every port.
    pub fn in_memory(config: &Config, clock: SharedClock) -> Self {
        let store = Arc::new(MemoryStore::new(config.cache_max_entries, clock.clone()));
        Self {
            store: store.clone(),
            counter: store.clone(),
            broker: Arc::new(MemoryBroker::new(clock)),
            dead_letters: Arc::new(MemoryDeadLetterSink::new()),
            search: Arc::new(MemorySearchIndex::new()),
            events: Arc::new(MemoryEventPublisher::new()),
            memory_store: Some(store),
        }
    }

    /// Redis when `redis_url` is set and Elasticsearch when `search_url` is
    /// set; in-memory backends otherwise.
    ///
    /// # Errors
    /// Returns `Error::CacheUnavailable` if Redis cannot be reached.
    pub async fn connect(config: &Config, clock: SharedClock) -> Result<Self> {
        let mut backends = Self::in_memory(config, clock.clone());

        if let Some(url) = &config.redis_url {
            let redis = RedisStore::connect(url, config.cache_key_prefix.clone()).await?;
            let store = Arc::new(redis.clone());
            backends.store = store.clone();
            backends.counter = store;
            backends.broker = Arc::new(RedisBroker::new(
                redis.connection(),
                config.cache_key_prefix.clone(),
                clock,
            ));
            backends.dead_letters = Arc::new(RedisDeadLetterSink::new(
                redis.connection(),
                &config.cache_key_prefix,
            ));
            backends.events = Arc::new(RedisEventPublisher::new(
                redis.connection(),
                config.cache_key_prefix.clone(),
            ));
            backends.memory_store = None;
        } else {
            info!("REDIS_URL not set, using in-memory cache and broker");
        }

        if let Some(url) = &config.search_url {
            backends.search = Arc::new(ElasticsearchClient::new(url)?);
            info!(url = %url, "Using Elasticsearch search backend");
        }

        Ok(backends)
    }
}

// == App State ==
/// Application state shared across handlers and the pipeline.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Cache,
    pub limiter: RateLimiter,
    pub authenticator: Arc<Authenticator>,
    pub users: Arc<UserDirectory>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: MetricsCollector,
    pub search: Arc<dyn SearchBackend>,
    pub policy: Arc<RoutePolicy>,
    pub clock: SharedClock,
}

impl AppState {
    /// Wires the gateway components over `backends` and registers the
    /// built-in task handlers.
    pub fn build(config: Config, backends: &Backends, clock: SharedClock) -> Result<Self> {
        let metrics = MetricsCollector::new()?;

        let cache = Cache::new(backends.store.clone(), Some(config.cache_default_ttl));
        let limiter = RateLimiter::new(
            backends.counter.clone(),
            config.rate_limit_requests,
            config.rate_limit_period,
            clock.clone(),
        );
        let authenticator = Authenticator::new(&config.secret_key, config.token_ttl, clock.clone());
        let users = UserDirectory::new(&config.users);

        let policy = RetryPolicy {
            max_attempts: config.task_max_attempts,
            base_delay: config.task_retry_delay,
            max_delay: config.task_retry_max_delay,
        };
        let mut dispatcher = Dispatcher::new(
            backends.broker.clone(),
            backends.dead_letters.clone(),
            policy,
            config.task_lease,
            clock.clone(),
        )
        .with_metrics(metrics.clone())
        .with_events(backends.events.clone());
        register_builtin_handlers(&mut dispatcher, backends.search.clone());

        Ok(Self {
            policy: Arc::new(RoutePolicy::new(&config.api_prefix)),
            config: Arc::new(config),
            cache,
            limiter,
            authenticator: Arc::new(authenticator),
            users: Arc::new(users),
            dispatcher: Arc::new(dispatcher),
            metrics,
            search: backends.search.clone(),
            clock,
        })
    }

    /// State over in-memory backends and the system clock.
    pub fn in_memory(config: Config) -> Result<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        let backends = Backends::in_memory(&config, clock.clone());
        Self::build(config, &backends, clock)
    }
}
