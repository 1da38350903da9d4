//! JSON API.

use crate::error::AppError;
use crate::pages::message_id;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

/// `GET /api/movies`
pub async fn movies(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.catalog.get_or_fetch(false).await;
    Json(json!({
        "success": true,
        "total": snapshot.len(),
        "movies": snapshot.movies,
    }))
}

/// `GET /api/movies/{id}`
pub async fn movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = message_id(&id)?;
    let movie = state
        .catalog
        .find(id)
        .await
        .ok_or_else(|| AppError::NotFound("Movie not found".to_string()))?;
    Ok(Json(json!({ "success": true, "movie": movie })))
}

/// `GET /api/search?q=`
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Value>, AppError> {
    let query = params.q.trim().to_lowercase();
    if query.is_empty() {
        return Err(AppError::BadRequest("Search query required".to_string()));
    }

    let snapshot = state.catalog.get_or_fetch(false).await;
    let results = snapshot.search(&query);
    Ok(Json(json!({
        "success": true,
        "query": query,
        "total": results.len(),
        "results": results,
    })))
}

/// `GET /api/refresh`
pub async fn refresh(State(state): State<AppState>) -> Json<Value> {
    info!("🔄 Catalog refresh requested");
    let snapshot = state.catalog.get_or_fetch(true).await;
    Json(json!({
        "success": true,
        "message": "Cache refreshed successfully",
        "total": snapshot.len(),
    }))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
