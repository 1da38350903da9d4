//! HTML pages.

use crate::error::{AppError, PageError};
use crate::{views, AppState};
use axum::extract::{Path, State};
use axum::response::Html;
use myflix_core::temp::clean_temp_files;

/// Parse a message id path segment; anything else is an unknown page.
pub(crate) fn message_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound("Movie not found".to_string()))
}

/// `GET /`
pub async fn index(State(state): State<AppState>) -> Html<String> {
    clean_temp_files(&state.config.temp_dir, state.config.max_temp_file_age).await;

    let snapshot = state.catalog.get_or_fetch(false).await;
    Html(views::index_page(&snapshot, &state.config.categories))
}

/// `GET /watch/{id}`
pub async fn watch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, PageError> {
    let id = message_id(&id)?;
    let movie = state
        .catalog
        .find(id)
        .await
        .ok_or_else(|| AppError::NotFound("Movie not found".to_string()))?;
    Ok(Html(views::watch_page(&movie)))
}

/// `GET /category/{genre}`
pub async fn category(State(state): State<AppState>, Path(genre): Path<String>) -> Html<String> {
    let snapshot = state.catalog.get_or_fetch(false).await;
    let movies = snapshot.by_genre(&genre);
    Html(views::category_page(&genre, &movies))
}

/// Any unknown path.
pub async fn not_found() -> PageError {
    AppError::NotFound("Page not found".to_string()).page()
}
