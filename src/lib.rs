pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod market;
pub mod state;
pub mod storage;
pub mod telemetry;

use axum::routing::{get, post, put};
use axum::Router;
use commands::{
    app_info::app_info,
    dashboard::{dashboard_get, dashboard_refresh, dashboard_search, dashboard_sort},
    favorites::{favorite_toggle, favorites_list},
    health::health,
    market_assets::list_cryptos,
};
use config::AppConfig;
use db::initialize_pool;
use error::AppError;
use market::coingecko::build_http_client;
use market::controller::{AssetFeed, RefreshController};
use market::gateway::MarketGateway;
use sqlx::SqlitePool;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use storage::{spawn_cross_context_sync, KvStore, CROSS_CONTEXT_SYNC_INTERVAL_MS};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/app-info", get(app_info))
        .route("/api/cryptos", get(list_cryptos))
        .route("/api/dashboard", get(dashboard_get))
        .route("/api/dashboard/sort", post(dashboard_sort))
        .route("/api/dashboard/search", put(dashboard_search))
        .route("/api/dashboard/refresh", post(dashboard_refresh))
        .route("/api/favorites", get(favorites_list))
        .route("/api/favorites/:id/toggle", post(favorite_toggle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Opens the SQLite-backed store, or an in-memory one when the database is
/// unavailable.
pub async fn open_store(config: &AppConfig) -> (Option<SqlitePool>, Arc<KvStore>) {
    let pool = match initialize_pool(config).await {
        Ok(pool) => pool,
        Err(error) => {
            tracing::warn!(
                %error,
                path = %config.db_path().display(),
                "database unavailable, favorites will not survive restarts"
            );
            return (None, Arc::new(KvStore::in_memory()));
        }
    };

    match KvStore::open(pool.clone()).await {
        Ok(store) => (Some(pool), Arc::new(store)),
        Err(error) => {
            tracing::warn!(%error, "failed to load persisted store, using memory only");
            (Some(pool), Arc::new(KvStore::in_memory()))
        }
    }
}

pub async fn run() -> Result<(), AppError> {
    let dotenv_result = dotenvy::dotenv();
    telemetry::init_tracing();
    if let Err(error) = dotenv_result {
        tracing::debug!(%error, "no .env file loaded");
    }

    let config = AppConfig::from_env()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        upstream = %config.market_api_base_url,
        "starting crypto dashboard"
    );

    let (db_pool, store) = open_store(&config).await;
    let gateway = Arc::new(MarketGateway::new(
        build_http_client()?,
        &config.market_api_base_url,
    ));
    let feed: Arc<dyn AssetFeed> = gateway.clone();
    let controller = RefreshController::new(feed, Arc::clone(&store));
    controller.start()?;

    let shutdown_token = CancellationToken::new();
    let sync_handle = store.is_persistent().then(|| {
        spawn_cross_context_sync(
            Arc::clone(&store),
            Duration::from_millis(CROSS_CONTEXT_SYNC_INTERVAL_MS),
            shutdown_token.clone(),
        )
    });

    let state = Arc::new(AppState::new(
        db_pool.clone(),
        Arc::clone(&store),
        gateway,
        Arc::clone(&controller),
    ));
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "http server listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown_token.cancel();
    controller.stop().await;
    if let Some(handle) = sync_handle {
        let _ = handle.await;
    }
    store.flush().await;
    if let Some(pool) = db_pool {
        pool.close().await;
    }
    tracing::info!("crypto dashboard stopped");

    serve_result?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(error) => {
            tracing::warn!(%error, "failed to install ctrl+c handler, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
