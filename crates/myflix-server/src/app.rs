//! Composition root: wires settings, transport, catalog and web state.

use async_trait::async_trait;
use myflix_core::cache::{CatalogCache, CatalogFetcher, SnapshotFile};
use myflix_core::catalog::CatalogItem;
use myflix_core::config::{AuthMode, ChannelRef, ConfigIssue, Settings};
use myflix_core::ratelimit::SlidingWindowLimiter;
use myflix_core::source::{CatalogSource, ChannelClient, ScanPolicy};
use myflix_core::temp::clean_temp_files;
use myflix_web::{AppState, WebConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stands in for the channel scan when no channel can be resolved.
struct Unconfigured(ConfigIssue);

#[async_trait]
impl CatalogFetcher for Unconfigured {
    async fn fetch_items(&self) -> Vec<CatalogItem> {
        warn!("⚠️ Skipping channel scan: {}", self.0);
        Vec::new()
    }
}

fn scan_target(settings: &Settings) -> Result<(AuthMode, ChannelRef), ConfigIssue> {
    Ok((settings.auth_mode()?, settings.channel()?))
}

fn channel_source(settings: &Settings, client: Arc<dyn ChannelClient>) -> Result<CatalogSource, ConfigIssue> {
    let (mode, channel) = scan_target(settings)?;
    let policy = ScanPolicy {
        max_flood_retries: settings.flood_wait_max_retries,
    };
    Ok(CatalogSource::new(client, mode, channel, policy))
}

/// The channel scan for `settings`, or a no-op when it cannot run.
pub fn catalog_fetcher(settings: &Settings, client: Arc<dyn ChannelClient>) -> Arc<dyn CatalogFetcher> {
    match channel_source(settings, client) {
        Ok(source) => Arc::new(source),
        Err(issue) => Arc::new(Unconfigured(issue)),
    }
}

/// Shared handler state for `settings` on top of `client`.
pub fn build_state(settings: &Settings, client: Arc<dyn ChannelClient>) -> AppState {
    let file = SnapshotFile::new(settings.cache_file(), settings.cache_expiry());
    let fetcher = catalog_fetcher(settings, Arc::clone(&client));

    AppState {
        catalog: Arc::new(CatalogCache::new(file, fetcher)),
        client,
        limiter: Arc::new(SlidingWindowLimiter::default()),
        config: Arc::new(WebConfig::from_settings(settings)),
    }
}

/// Warm the catalog before serving.
///
/// A fresh snapshot on disk is used as is; otherwise the channel is scanned,
/// which checks access first. Failures are reported; the server still starts.
pub async fn warm_up(state: &AppState) {
    let snapshot = state.catalog.get_or_fetch(false).await;
    info!("🎬 Catalog ready: {} movies", snapshot.len());
}

/// Periodically expire temp files until `cancel` fires.
pub async fn run_janitor(
    dir: PathBuf,
    max_age: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately; startup already has a clean dir.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = clean_temp_files(&dir, max_age).await;
                if removed > 0 {
                    info!("🧹 Removed {removed} stale temp files");
                } else {
                    debug!("Temp sweep: nothing to remove");
                }
            }
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}
