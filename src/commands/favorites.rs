use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteToggleResult {
    pub id: String,
    pub favorite: bool,
    pub favorites: BTreeSet<String>,
}

pub async fn favorites_list(State(state): State<Arc<AppState>>) -> Json<BTreeSet<String>> {
    Json(state.controller.favorites())
}

pub async fn favorite_toggle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FavoriteToggleResult>, AppError> {
    let favorite = state.controller.toggle_favorite(&id)?;
    Ok(Json(FavoriteToggleResult {
        id: id.trim().to_string(),
        favorite,
        favorites: state.controller.favorites(),
    }))
}
