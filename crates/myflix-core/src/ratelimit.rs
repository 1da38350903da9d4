//! Per-client request rate limiting
//!
//! Every client key (the caller's IP) has one history of request times over a
//! sliding window. Routes share that history but apply their own cap, so a
//! burst of page views also counts against the stream and refresh budgets.

use crate::config::{Settings, RATE_LIMIT_WINDOW};
use async_trait::async_trait;
use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound on tracked clients.
const MAX_TRACKED_CLIENTS: u64 = 100_000;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request is recorded and may proceed
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    /// The request is refused and not recorded
    Limited {
        /// The cap that was hit
        max: u32,
        /// Time until the oldest recorded request leaves the window
        retry_after: Duration,
    },
}

impl RateDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Decides whether a client may make another request.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check `key` against a cap of `max` requests per window.
    async fn check(&self, key: &str, max: u32) -> RateDecision;
}

type History = Arc<Mutex<VecDeque<Instant>>>;

/// Sliding-window limiter keyed by client.
///
/// Histories of idle clients are evicted once they have been untouched for a
/// full window.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    histories: Cache<String, History>,
    window: Duration,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let histories = Cache::builder()
            .max_capacity(MAX_TRACKED_CLIENTS)
            .time_to_idle(window)
            .build();

        Self { histories, window }
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, key: &str, max: u32) -> RateDecision {
        let history = self
            .histories
            .get_with(key.to_string(), async { History::default() })
            .await;

        let now = Instant::now();
        let mut times = history.lock().unwrap_or_else(PoisonError::into_inner);

        while times
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            times.pop_front();
        }

        let used = u32::try_from(times.len()).unwrap_or(u32::MAX);
        if used >= max {
            let retry_after = times
                .front()
                .map_or(self.window, |t| self.window.saturating_sub(now.duration_since(*t)));
            debug!("⛔️ Rate limit hit for {key}: {used}/{max} in window");
            return RateDecision::Limited { max, retry_after };
        }

        times.push_back(now);
        RateDecision::Allowed {
            remaining: max - used - 1,
        }
    }
}

/// Route classes with their own caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Pages and API reads
    Default,
    /// Media bytes
    Stream,
    /// Forced catalog rescans
    Refresh,
}

/// Per-route caps taken from the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub enabled: bool,
    pub default: u32,
    pub stream: u32,
    pub refresh: u32,
}

impl RateLimits {
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.rate_limit_enabled,
            default: settings.max_requests_per_minute,
            stream: settings.stream_requests_per_minute,
            refresh: settings.refresh_requests_per_minute,
        }
    }

    /// The cap applied to `class`.
    #[must_use]
    pub const fn max_for(&self, class: RouteClass) -> u32 {
        match class {
            RouteClass::Default => self.default,
            RouteClass::Stream => self.stream,
            RouteClass::Refresh => self.refresh,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
