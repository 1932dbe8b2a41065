//! API Gateway server binary
//!
//! `api_gateway` serves the gateway; `api_gateway hash-password <password>`
//! prints an Argon2 hash for use in `GATEWAY_USERS`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_gateway::auth::hash_password;
use api_gateway::clock::{SharedClock, SystemClock};
use api_gateway::{
    create_router, spawn_cleanup_task, spawn_dispatch_workers, AppState, Backends, Config,
};

/// Main entry point for the gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect backends (Redis / Elasticsearch when configured)
/// 4. Build application state and register task handlers
/// 5. Start dispatcher workers and, for the in-memory store, the TTL purge
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    if let Some(command) = args.next() {
        return run_command(&command, args.next());
    }

    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting API Gateway");

    let config = Config::from_env();
    if config.uses_insecure_secret() {
        warn!("SECRET_KEY is not set, using an insecure development secret");
    }
    if config.users.is_empty() {
        warn!("GATEWAY_USERS is empty, logins will always be rejected");
    }
    info!(
        port = config.server_port,
        api_prefix = %config.api_prefix,
        rate_limit = config.rate_limit_requests,
        rate_period_secs = config.rate_limit_period.as_secs(),
        task_workers = config.task_workers,
        "Configuration loaded"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let backends = Backends::connect(&config, clock.clone())
        .await
        .context("Failed to connect backends")?;
    let state = AppState::build(config, &backends, clock).context("Failed to build state")?;
    let config = state.config.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = spawn_dispatch_workers(
        state.dispatcher.clone(),
        config.task_workers,
        config.task_poll_interval,
        shutdown_rx,
    );

    let cleanup_handle = backends.memory_store.clone().map(|store| {
        spawn_cleanup_task(store, state.metrics.clone(), config.cleanup_interval)
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // Let in-flight work items finish before exiting.
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Dispatcher worker ended abnormally");
        }
    }
    abort_cleanup(cleanup_handle);

    info!("Server shutdown complete");
    Ok(())
}

fn run_command(command: &str, argument: Option<String>) -> anyhow::Result<()> {
    match command {
        "hash-password" => {
            let password = argument.context("usage: api_gateway hash-password <password>")?;
            let hash = hash_password(&password)?;
            println!("{}", hash);
            Ok(())
        }
        other => anyhow::bail!("Unknown command '{}'", other),
    }
}

fn abort_cleanup(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
