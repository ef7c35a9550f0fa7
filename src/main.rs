mod config;
mod db;
mod domain;
mod error;
mod middleware;
mod services;
mod state;
mod time_utils;
mod web;

use crate::config::{AppConfig, StorageBackend};
use crate::db::seed;
use crate::services::ai::{DisabledDrafts, DraftGenerator, OpenAiDrafts};
use crate::services::identity::{CodeSender, LogCodeSender, WebhookCodeSender};
use crate::services::storage::{HttpObjectStorage, MemoryObjectStorage, ObjectStorage};
use crate::state::{AppParts, AppState, SharedState, Stores};
use crate::time_utils::SystemClock;
use axum::{routing::get_service, Router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHELL_IDLE_LIMIT: Duration = Duration::from_secs(24 * 3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let stores = match config.backend {
        StorageBackend::Postgres => {
            let database_url = config.database_url.as_deref().unwrap_or_default();
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
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
            tracing::info!("Database ready");
            Stores::postgres(pool)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Stores::memory()
        }
    };

    seed::seed_all(
        &stores,
        config.admin_email.as_deref(),
        config.backend == StorageBackend::Memory,
    )
    .await?;

    let storage: Arc<dyn ObjectStorage> = match &config.object_storage {
        Some(bucket) => Arc::new(HttpObjectStorage::new(
            &bucket.endpoint,
            &bucket.public_base,
            bucket.api_key.clone(),
        )),
        None => {
            tracing::warn!("OBJECT_STORAGE_URL not set, keeping regulation files in memory");
            Arc::new(MemoryObjectStorage::default())
        }
    };

    let code_sender: Arc<dyn CodeSender> = match &config.code_webhook_url {
        Some(url) => Arc::new(WebhookCodeSender::new(url.clone())),
        None => {
            tracing::warn!("CODE_WEBHOOK_URL not set, login codes are written to the log");
            Arc::new(LogCodeSender)
        }
    };

    let generator: Arc<dyn DraftGenerator> = match &config.drafts.api_key {
        Some(key) => Arc::new(OpenAiDrafts::new(&config.drafts.api_base, key, &config.drafts.model)),
        None => {
            tracing::warn!("DRAFT_API_KEY not set, report drafts are disabled");
            Arc::new(DisabledDrafts)
        }
    };

    let state = AppState::assemble(AppParts {
        stores,
        storage,
        code_sender,
        generator,
        clock: Arc::new(SystemClock),
        tz: config.timezone,
        session_key: config.session_key.clone(),
        draft_timeout: config.drafts.timeout,
        login_code_ttl: config.login_code_ttl,
        secure_cookies: config.production,
    })
    .await?;
    let shared: SharedState = Arc::new(state);

    let scheduler = JobScheduler::new().await?;

    // Hourly housekeeping: stale login codes, idle shells, limiter buckets.
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                let codes = state.identity.purge_expired().await;
                let shells = state.purge_idle_shells(SHELL_IDLE_LIMIT).await;
                let buckets = web::auth::cleanup_limiters(&state).await;
                if codes + shells + buckets > 0 {
                    tracing::info!(
                        "Cleanup removed {} login codes, {} idle shells, {} limiter buckets",
                        codes,
                        shells,
                        buckets
                    );
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started: hourly cleanup");

    let static_handler = ServeDir::new("static").not_found_service(ServeFile::new("static/index.html"));

    let app = Router::new()
        .merge(web::routes(shared.clone()))
        .fallback_service(get_service(static_handler))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
