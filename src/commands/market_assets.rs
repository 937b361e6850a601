use crate::error::AppError;
use crate::market::types::AssetRecord;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// `GET /api/cryptos`: the normalized top-market list, or 500 with a message
/// when the upstream is unavailable.
pub async fn list_cryptos(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AssetRecord>>, AppError> {
    let assets = state.gateway.try_fetch_assets().await?;
    Ok(Json(assets))
}
