//! Rate-limit middleware.

use crate::error::AppError;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use myflix_core::ratelimit::{RateDecision, RateLimiter, RateLimits, RouteClass};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Key used when the peer address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

/// State of one rate-limited route group.
#[derive(Clone)]
pub struct LimitState {
    pub limiter: Arc<dyn RateLimiter>,
    pub limits: RateLimits,
    pub class: RouteClass,
}

/// Reject the request with 429 when the client is over its cap.
pub async fn enforce(State(state): State<LimitState>, request: Request, next: Next) -> Response {
    if !state.limits.enabled {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let client = ConnectInfo::<SocketAddr>::from_request_parts(&mut parts, &())
        .await
        .map_or_else(|_| UNKNOWN_CLIENT.to_string(), |ConnectInfo(addr)| addr.ip().to_string());
    let request = Request::from_parts(parts, body);

    let max = state.limits.max_for(state.class);
    match state.limiter.check(&client, max).await {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { max, retry_after } => {
            warn!(
                "⛔️ Rate limit exceeded for {client} on {} ({max}/min)",
                request.uri().path()
            );
            AppError::RateLimited {
                max,
                retry_after_secs: retry_after.as_secs().max(1),
            }
            .into_response()
        }
    }
}
