//! Media endpoints: video streaming and thumbnails.

use crate::error::{AppError, PageError};
use crate::pages::message_id;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, RANGE,
};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use myflix_core::catalog::CatalogItem;
use myflix_core::streaming::{open_stream, ByteRange, StreamError};
use myflix_core::temp::thumbnail_path;
use tracing::{debug, error, warn};

impl From<StreamError> for AppError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::MalformedRange(raw) => Self::BadRequest(format!("Invalid Range header: {raw}")),
            StreamError::Unsatisfiable { total } => Self::RangeNotSatisfiable { total },
            StreamError::Upstream(e) => Self::Internal(e.to_string()),
        }
    }
}

async fn lookup(state: &AppState, raw_id: &str) -> Result<CatalogItem, AppError> {
    let id = message_id(raw_id)?;
    state
        .catalog
        .find(id)
        .await
        .ok_or_else(|| AppError::NotFound("Movie not found".to_string()))
}

/// Header-safe download name.
fn file_name(title: &str) -> String {
    let name: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.mp4", name.trim())
}

/// `GET /stream/{id}`
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, PageError> {
    let movie = lookup(&state, &id).await?;
    let total = movie.file_size;

    // Without a known size a range cannot be resolved; serve the whole file.
    let range = match headers.get(RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw) if total > 0 => Some(ByteRange::parse(raw, total).map_err(AppError::from)?),
        _ => None,
    };
    debug!("Streaming {} ({:?} of {total} bytes)", movie.message_id, range);

    let plan = open_stream(
        state.client.as_ref(),
        &movie.file_id,
        range,
        total,
        state.config.chunk_size,
    )
    .await
    .map_err(|e| {
        error!("❌ Error in stream route for {}: {e}", movie.message_id);
        AppError::from(e)
    })?;

    let mut response = Response::builder()
        .status(plan.status)
        .header(CONTENT_TYPE, "video/mp4")
        .header(ACCEPT_RANGES, "bytes")
        .header(
            CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", file_name(&movie.title)),
        );
    if let Some(length) = plan.content_length {
        response = response.header(CONTENT_LENGTH, length);
    }
    if let Some(content_range) = plan.content_range {
        response = response.header(CONTENT_RANGE, content_range);
    }

    response
        .body(Body::from_stream(plan.body))
        .map_err(|e| AppError::Internal(e.to_string()).page())
}

/// `GET /thumbnail/{id}`
///
/// Thumbnails are fetched once and kept in the temp directory, where the
/// janitor eventually expires them.
pub async fn thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, PageError> {
    let movie = lookup(&state, &id).await?;
    let thumb_id = movie
        .thumbnail
        .as_deref()
        .ok_or_else(|| AppError::NotFound("No thumbnail available".to_string()))?;

    let path = thumbnail_path(&state.config.temp_dir, movie.message_id);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let file = state.client.open_file(thumb_id, 0).await.map_err(|e| {
                error!("❌ Error downloading thumbnail for {}: {e}", movie.message_id);
                AppError::NotFound("No thumbnail available".to_string())
            })?;
            let bytes: Vec<u8> = file
                .chunks
                .try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;

            if let Err(e) = write_cached(&path, &bytes).await {
                warn!("⚠️ Could not cache thumbnail at {}: {e}", path.display());
            }
            bytes
        }
    };

    Ok((
        [
            (CONTENT_TYPE, "image/jpeg"),
            (CACHE_CONTROL, "public, max-age=86400"),
        ],
        bytes,
    )
        .into_response())
}

async fn write_cached(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_header_safe() {
        assert_eq!(file_name("Amélie \"2001\""), "Am_lie _2001_.mp4");
        assert_eq!(file_name("Heat"), "Heat.mp4");
    }
}
