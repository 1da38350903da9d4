//! Handler errors and their HTTP rendering.

use crate::views;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors a handler can answer with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Unknown movie, page or asset
    #[error("{0}")]
    NotFound(String),
    /// Invalid request parameters
    #[error("{0}")]
    BadRequest(String),
    /// The requested byte range lies outside the file
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable {
        /// File size
        total: u64,
    },
    /// Per-client request cap reached
    #[error("Maximum {max} requests per minute")]
    RateLimited {
        /// The cap that was hit
        max: u32,
        /// Seconds until a request would be accepted
        retry_after_secs: u64,
    },
    /// Anything unexpected
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as an HTML error page instead of JSON.
    #[must_use]
    pub const fn page(self) -> PageError {
        PageError(self)
    }

    fn with_headers(&self, mut response: Response) -> Response {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            Self::RangeNotSatisfiable { total } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::RateLimited { .. } => json!({
                "error": "Rate limit exceeded",
                "message": self.to_string(),
            }),
            _ => json!({
                "success": false,
                "error": self.to_string(),
            }),
        };
        let response = (self.status(), Json(body)).into_response();
        self.with_headers(response)
    }
}

/// [`AppError`] rendered as an HTML page.
#[derive(Debug)]
pub struct PageError(pub AppError);

impl From<AppError> for PageError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let error = self.0;
        // Rate-limit rejections keep their JSON body on every route
        if matches!(error, AppError::RateLimited { .. }) {
            return error.into_response();
        }

        let status = error.status();
        let message = match &error {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let response = (status, Html(views::error_page(status.as_u16(), &message))).into_response();
        error.with_headers(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::RangeNotSatisfiable { total: 10 }.status(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(AppError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let response = AppError::RateLimited {
            max: 10,
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from(42u64))
        );
    }

    #[test]
    fn test_unsatisfiable_range_reports_size() {
        let response = AppError::RangeNotSatisfiable { total: 1000 }.page().into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE),
            Some(&HeaderValue::from_static("bytes */1000"))
        );
    }
}
