//! MyFlix web layer.
//!
//! HTML pages, the JSON API and media streaming on top of the core catalog.

/// JSON API handlers.
pub mod api;
/// Handler errors.
pub mod error;
/// Rate-limit middleware.
pub mod limit;
/// HTML page handlers.
pub mod pages;
/// Stream and thumbnail handlers.
pub mod stream;
/// HTML rendering.
pub mod views;

pub use error::{AppError, PageError};

use axum::routing::get;
use axum::{middleware, Router};
use limit::LimitState;
use myflix_core::cache::CatalogCache;
use myflix_core::config::Settings;
use myflix_core::ratelimit::{RateLimiter, RateLimits, RouteClass};
use myflix_core::source::ChannelClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Web-facing settings.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub chunk_size: usize,
    pub temp_dir: PathBuf,
    pub max_temp_file_age: Duration,
    pub categories: Vec<String>,
    pub limits: RateLimits,
}

impl WebConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            temp_dir: settings.temp_download_dir.clone(),
            max_temp_file_age: settings.temp_file_max_age(),
            categories: settings.categories(),
            limits: RateLimits::from_settings(settings),
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogCache>,
    pub client: Arc<dyn ChannelClient>,
    pub limiter: Arc<dyn RateLimiter>,
    pub config: Arc<WebConfig>,
}

impl AppState {
    fn limited(&self, class: RouteClass) -> LimitState {
        LimitState {
            limiter: Arc::clone(&self.limiter),
            limits: self.config.limits,
            class,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(pages::index))
        .route("/watch/{id}", get(pages::watch))
        .route("/category/{genre}", get(pages::category))
        .route("/thumbnail/{id}", get(stream::thumbnail))
        .route("/api/movies", get(api::movies))
        .route("/api/movies/{id}", get(api::movie))
        .route("/api/search", get(api::search))
        .route_layer(middleware::from_fn_with_state(
            state.limited(RouteClass::Default),
            limit::enforce,
        ));

    let streaming = Router::new()
        .route("/stream/{id}", get(stream::stream))
        .route_layer(middleware::from_fn_with_state(
            state.limited(RouteClass::Stream),
            limit::enforce,
        ));

    let refresh = Router::new()
        .route("/api/refresh", get(api::refresh))
        .route_layer(middleware::from_fn_with_state(
            state.limited(RouteClass::Refresh),
            limit::enforce,
        ));

    Router::new()
        .merge(pages)
        .merge(streaming)
        .merge(refresh)
        .route("/health", get(api::health))
        .fallback(pages::not_found)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
