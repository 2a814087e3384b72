mod analytics;
mod config;
mod crypto;
mod db;
mod domain;
mod error;
mod middleware;
mod services;
mod state;
mod time_utils;
mod web;

use crate::config::Config;
use crate::db::seed;
use crate::middleware::RateLimiter;
use crate::state::SharedState;
use axum::{routing::get_service, Router};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, services::ServeFile, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(&cfg.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run database migrations: {}", e);
        e
    })?;

    seed::seed_all(
        &pool,
        cfg.seed_admin.as_ref().map(|(u, p)| (u.as_str(), p.as_str())),
    )
    .await?;

    let login_limiter = RateLimiter::new(cfg.login_rate_limit, Duration::from_secs(60));
    let static_dir = cfg.static_dir.clone();
    let bind_addr = cfg.bind_addr.clone();
    let shared: SharedState = Arc::new(state::AppState {
        pool,
        config: Arc::new(cfg),
        login_limiter,
    });

    let scheduler = JobScheduler::new().await?;

    // Hourly: drop expired/revoked sessions and idle rate-limit buckets
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                match db::purge_sessions(&state.pool).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Purged {} stale sessions", n),
                    Err(e) => tracing::error!("Failed to purge sessions: {}", e),
                }
                let pruned = state.login_limiter.prune().await;
                if pruned > 0 {
                    tracing::debug!("Pruned {} login rate-limit buckets", pruned);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started: session cleanup hourly");

    let static_handler =
        ServeDir::new(&static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    let app = Router::new()
        .merge(web::routes(shared.clone()))
        .fallback_service(get_service(static_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    tracing::info!("Listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
