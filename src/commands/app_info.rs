use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Static build metadata plus the effective refresh settings, so the front
/// end can render "refreshes every N s" without hard-coding it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfoResponse {
    pub product_name: &'static str,
    pub version: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
    pub upstream_endpoint: String,
    pub refresh_interval_ms: u64,
    pub cache_window_secs: u64,
    pub favorites_persistent: bool,
}

pub fn build_app_info_response(state: &AppState) -> AppInfoResponse {
    AppInfoResponse {
        product_name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        upstream_endpoint: state.gateway.endpoint().to_string(),
        refresh_interval_ms: state.controller.refresh_interval().as_millis() as u64,
        cache_window_secs: state.gateway.cache_window().as_secs(),
        favorites_persistent: state.store.is_persistent(),
    }
}

pub async fn app_info(State(state): State<Arc<AppState>>) -> Json<AppInfoResponse> {
    Json(build_app_info_response(&state))
}
