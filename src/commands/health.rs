use crate::market::types::DashboardPhase;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    /// `ok`, `error`, or `memory` when favorites are not backed by SQLite.
    pub db: &'static str,
    pub phase: DashboardPhase,
    pub last_updated_at_ms: Option<i64>,
}

async fn probe_database(pool: Option<&SqlitePool>) -> &'static str {
    let Some(pool) = pool else {
        return "memory";
    };
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => "ok",
        Err(error) => {
            tracing::warn!(%error, "health check database probe failed");
            "error"
        }
    }
}

pub async fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_ms: state.started_at.elapsed().as_millis(),
        db: probe_database(state.db_pool.as_ref()).await,
        phase: state.controller.phase(),
        last_updated_at_ms: state.controller.last_updated_at_ms(),
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(build_health_response(&state).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::controller::{AssetFeed, RefreshController};
    use crate::market::gateway::MarketGateway;
    use crate::storage::KvStore;

    fn state_with_pool(db_pool: Option<SqlitePool>) -> AppState {
        let gateway = Arc::new(MarketGateway::new(reqwest::Client::new(), "http://127.0.0.1:1"));
        let store = Arc::new(KvStore::in_memory());
        let feed: Arc<dyn AssetFeed> = gateway.clone();
        let controller = RefreshController::new(feed, Arc::clone(&store));
        AppState::new(db_pool, store, gateway, controller)
    }

    #[tokio::test]
    async fn health_reports_ok_status_and_db_health() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should initialize");

        let response = build_health_response(&state_with_pool(Some(pool))).await;

        assert_eq!(response.status, "ok");
        assert_eq!(response.db, "ok");
        assert!(response.uptime_ms <= 1_000);
    }

    #[tokio::test]
    async fn health_reports_memory_store_and_initial_phase() {
        let response = build_health_response(&state_with_pool(None)).await;

        assert_eq!(response.db, "memory");
        assert_eq!(response.phase, DashboardPhase::Initial);
        assert_eq!(response.last_updated_at_ms, None);
    }

    #[tokio::test]
    async fn closed_pool_reports_db_error() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should initialize");
        pool.close().await;

        let response = build_health_response(&state_with_pool(Some(pool))).await;
        assert_eq!(response.db, "error");
    }
}
