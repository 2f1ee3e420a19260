//! Hookline webhook delivery service.
//!
//! Composition root: constructs the Postgres pool, Redis connections,
//! storage, cache, job queue, delivery engine, maintenance and retention
//! loops, and the HTTP server, then coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookline_api::{AppState, Config};
use hookline_cache::{RedisCacheBackend, SubscriptionCache};
use hookline_core::{store::postgres::PostgresStore, RealClock, Storage};
use hookline_delivery::{DeliveryContext, DeliveryEngine, RetentionSweeper};
use hookline_queue::{QueueMaintenance, RedisJobStore, DELIVERIES_QUEUE};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting hookline webhook delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        redis_url = %config.redis_url,
        worker_pool_size = config.worker_pool_size,
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    PostgresStore::migrate(&db_pool).await.context("Failed to run schema bootstrap")?;
    info!("database ready");

    let redis_client =
        redis::Client::open(config.redis_url.clone()).context("Invalid REDIS_URL")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to connect to Redis")?;
    info!("redis connection established");

    // Composition root: every component receives its dependencies here and
    // nothing reaches for globals.
    let clock = Arc::new(RealClock::new());
    let storage = Storage::postgres(db_pool.clone());

    let mut cache = SubscriptionCache::new(
        Arc::new(RedisCacheBackend::new(redis_conn.clone())),
        storage.subscriptions.clone(),
    );
    if let Some(ttl) = config.cache_ttl_seconds {
        cache = cache.with_ttl(Duration::from_secs(ttl));
    }
    let cache = Arc::new(cache);

    let jobs = Arc::new(
        RedisJobStore::new(redis_conn)
            .with_visibility_timeout(Duration::from_secs(config.visibility_timeout_seconds)),
    );

    let shutdown_token = CancellationToken::new();

    let maintenance = QueueMaintenance::new(
        jobs.clone(),
        DELIVERIES_QUEUE,
        Duration::from_millis(config.queue_maintenance_interval_ms),
        shutdown_token.clone(),
        clock.clone(),
    );
    tokio::spawn(maintenance.run());

    let sweeper = RetentionSweeper::new(
        storage.delivery_logs.clone(),
        shutdown_token.clone(),
        clock.clone(),
    )
    .with_horizon(config.retention_horizon())
    .with_interval(Duration::from_secs(config.retention_interval_seconds));
    tokio::spawn(sweeper.run());

    let delivery_context = DeliveryContext {
        jobs: jobs.clone(),
        cache: cache.clone(),
        logs: storage.delivery_logs.clone(),
        clock,
    };
    let mut engine = DeliveryEngine::new(delivery_context, config.to_delivery_config())?;
    engine.start().await?;

    let state = AppState::new(storage, cache, jobs);
    let addr = config.parse_server_addr()?;
    let server_handle = tokio::spawn({
        let config = config.clone();
        async move {
            if let Err(e) = hookline_api::start_server(state, &config, addr).await {
                error!(error = %e, "server failed");
            }
        }
    });

    info!(addr = %addr, "hookline is ready to receive webhooks");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    shutdown_token.cancel();
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine shutdown failed");
    }

    // The server drains itself on the same signal; give it a bounded grace
    // period before closing the pool under it.
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            info!("shutdown grace period expired");
        }
        _ = server_handle => {
            info!("server stopped");
        }
    }

    db_pool.close().await;
    info!("hookline shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hookline=debug,tower_http=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
