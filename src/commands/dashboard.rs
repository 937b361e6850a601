use crate::error::AppError;
use crate::market::types::{DashboardSnapshot, SearchTermArgs, SortColumnArgs};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

pub async fn dashboard_get(State(state): State<Arc<AppState>>) -> Json<DashboardSnapshot> {
    Json(state.controller.snapshot())
}

pub async fn dashboard_sort(
    State(state): State<Arc<AppState>>,
    Json(args): Json<SortColumnArgs>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    let key = args.normalize()?;
    state.controller.click_sort_column(key);
    Ok(Json(state.controller.snapshot()))
}

pub async fn dashboard_search(
    State(state): State<Arc<AppState>>,
    Json(args): Json<SearchTermArgs>,
) -> Json<DashboardSnapshot> {
    state.controller.set_search_term(args.term);
    Json(state.controller.snapshot())
}

pub async fn dashboard_refresh(State(state): State<Arc<AppState>>) -> Json<DashboardSnapshot> {
    let outcome = state.controller.poll_once().await;
    tracing::debug!(?outcome, "manual refresh finished");
    Json(state.controller.snapshot())
}
