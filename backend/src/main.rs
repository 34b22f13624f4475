use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use matchbot_backend::clock::SystemClock;
use matchbot_backend::config::Config;
use matchbot_backend::db::{create_pool, run_migrations};
use matchbot_backend::http::{self, AppState};
use matchbot_backend::middleware::cors_middleware;
use matchbot_backend::notify::{LogNotifier, Notifier, WebhookNotifier};
use matchbot_backend::service::{Engine, EngineDeps, MemoryRateLimiter, RateLimiter, RedisRateLimiter};
use matchbot_backend::store::PgStore;
use matchbot_backend::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_telemetry(&config.server.rust_log);

    let db_pool = create_pool(&config)
        .await
        .context("Failed to create database pool")?;
    run_migrations(&db_pool)
        .await
        .context("Failed to run migrations")?;

    let rate_limiter: Arc<dyn RateLimiter> = match &config.redis.url {
        Some(url) => Arc::new(
            RedisRateLimiter::connect(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set, rate limits are tracked in-process");
            Arc::new(MemoryRateLimiter::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone()).context("Failed to build notifier")?),
        None => {
            tracing::warn!("NOTIFY_WEBHOOK_URL not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let engine = Arc::new(Engine::new(EngineDeps {
        store: Arc::new(PgStore::new(db_pool.clone())),
        notifier,
        moderation: None,
        rate_limiter,
        clock: Arc::new(SystemClock),
        config: config.engine.clone(),
    }));

    engine
        .reconciler
        .rearm_timeouts()
        .await
        .context("Failed to re-arm report timeouts")?;
    let repaired = engine
        .reconciler
        .repair_pending_settlements()
        .await
        .context("Failed to repair pending settlements")?;
    if repaired > 0 {
        tracing::warn!(repaired, "Finished settlements interrupted by the last shutdown");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = engine.spawn_background_jobs(shutdown_rx);

    tracing::info!("Starting match bot backend on {}:{}", config.server.host, config.server.port);

    let state = web::Data::new(AppState {
        engine: engine.clone(),
        pool: Some(db_pool),
    });
    let cors_origin = config.server.cors_origin.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_middleware(cors_origin.as_deref()))
            .wrap(actix_web::middleware::Logger::default())
            .configure(http::configure_routes)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run();

    // Graceful shutdown
    let server_handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received, stopping server...");
        server_handle.stop(true).await;
    });

    server.await?;
    let _ = shutdown_tx.send(true);
    for job in jobs {
        let _ = job.await;
    }
    tracing::info!("Background jobs stopped");
    Ok(())
}
