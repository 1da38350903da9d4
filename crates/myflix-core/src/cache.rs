//! Catalog snapshot cache
//!
//! The catalog is persisted as a single JSON file and served from memory
//! while it is fresh. A live scan replaces it; when a scan comes back empty
//! the last snapshot is served even if expired.

use crate::catalog::{CatalogItem, CatalogSnapshot};
use crate::source::CatalogSource;
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Errors that can occur while reading or writing the snapshot file
#[derive(Error, Debug)]
pub enum CacheError {
    /// The file does not exist
    #[error("cache file not found")]
    Missing,
    /// The file exists but holds no bytes
    #[error("cache file is empty")]
    Empty,
    /// The file does not hold a valid snapshot
    #[error("cache file corrupted: {0}")]
    Corrupted(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The on-disk snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    expiry: Duration,
}

impl SnapshotFile {
    #[must_use]
    pub const fn new(path: PathBuf, expiry: Duration) -> Self {
        Self { path, expiry }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `snapshot` is still inside the validity window.
    #[must_use]
    pub fn is_fresh(&self, snapshot: &CatalogSnapshot) -> bool {
        snapshot.age(Utc::now()) <= self.expiry
    }

    /// The persisted snapshot, if present, valid and not expired.
    pub async fn load(&self) -> Option<CatalogSnapshot> {
        let snapshot = self.load_any().await?;
        if self.is_fresh(&snapshot) {
            info!("✅ Loaded {} movies from cache", snapshot.total_movies);
            Some(snapshot)
        } else {
            info!("⚠️ Cache expired, will refresh from Telegram");
            None
        }
    }

    /// The persisted snapshot regardless of its age.
    pub async fn load_any(&self) -> Option<CatalogSnapshot> {
        match self.read().await {
            Ok(snapshot) => Some(snapshot),
            Err(CacheError::Missing) => {
                info!("⚠️ Cache file not found, will fetch from Telegram");
                None
            }
            Err(e) => {
                warn!("⚠️ Ignoring cache at {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Read and validate the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] when the file is missing, empty, unreadable
    /// or structurally invalid.
    pub async fn read(&self) -> Result<CatalogSnapshot, CacheError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(CacheError::Missing),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(CacheError::Empty);
        }

        let snapshot: CatalogSnapshot = serde_json::from_slice(&raw)?;
        if snapshot.total_movies != snapshot.movies.len() {
            return Err(CacheError::Corrupted(format!(
                "total_movies is {} but {} movies are stored",
                snapshot.total_movies,
                snapshot.movies.len()
            )));
        }
        Ok(snapshot)
    }

    /// Persist `items` as a new snapshot taken now.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if the file cannot be written.
    pub async fn save(&self, items: Vec<CatalogItem>) -> Result<CatalogSnapshot, CacheError> {
        let snapshot = CatalogSnapshot::new(items);
        self.write(&snapshot).await?;
        Ok(snapshot)
    }

    /// Persist an existing snapshot.
    ///
    /// Writes a uniquely named sibling temp file and renames it over the
    /// target, so readers never observe a half-written file and concurrent
    /// writers never collide. The last rename wins.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if the file cannot be written.
    pub async fn write(&self, snapshot: &CatalogSnapshot) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(snapshot)?;
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        info!("💾 Cache saved: {} movies", snapshot.total_movies);
        Ok(())
    }
}

/// Anything that can produce a live catalog.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Scan the source; an empty list means nothing could be fetched.
    async fn fetch_items(&self) -> Vec<CatalogItem>;
}

#[async_trait]
impl CatalogFetcher for CatalogSource {
    async fn fetch_items(&self) -> Vec<CatalogItem> {
        Self::fetch_items(self).await
    }
}

/// Cache-first access to the catalog.
pub struct CatalogCache {
    file: SnapshotFile,
    fetcher: Arc<dyn CatalogFetcher>,
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
}

impl CatalogCache {
    #[must_use]
    pub fn new(file: SnapshotFile, fetcher: Arc<dyn CatalogFetcher>) -> Self {
        Self {
            file,
            fetcher,
            current: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn file(&self) -> &SnapshotFile {
        &self.file
    }

    /// The snapshot held in memory, fresh or not.
    pub async fn current(&self) -> Option<Arc<CatalogSnapshot>> {
        self.current.read().await.clone()
    }

    /// The catalog, from memory, disk or a live scan.
    ///
    /// Without `force_refresh` a fresh in-memory or on-disk snapshot is
    /// returned as is. Otherwise the source is scanned; a non-empty result is
    /// persisted and returned, an empty one falls back to the last snapshot
    /// even if it has expired.
    pub async fn get_or_fetch(&self, force_refresh: bool) -> Arc<CatalogSnapshot> {
        if !force_refresh {
            if let Some(snapshot) = self.fresh_in_memory().await {
                return snapshot;
            }
            if let Some(snapshot) = self.file.load().await {
                return self.install(snapshot).await;
            }
        }

        info!("📥 Fetching movies from Telegram (force_refresh={force_refresh})...");
        let items = self.fetcher.fetch_items().await;

        if !items.is_empty() {
            let snapshot = CatalogSnapshot::new(items);
            // A failed write still serves the scan; the next refresh retries it.
            if let Err(e) = self.file.write(&snapshot).await {
                error!("❌ Error saving cache: {e}");
            }
            return self.install(snapshot).await;
        }

        warn!("⚠️ No movies fetched from Telegram");
        if let Some(snapshot) = self.current().await {
            info!("ℹ️ Returning previous catalog as fallback");
            return snapshot;
        }
        if let Some(snapshot) = self.file.load_any().await {
            info!("ℹ️ Returning expired cache as fallback");
            return self.install(snapshot).await;
        }

        Arc::new(CatalogSnapshot::empty())
    }

    /// Look an item up in the current catalog.
    pub async fn find(&self, message_id: i64) -> Option<CatalogItem> {
        self.get_or_fetch(false).await.find(message_id).cloned()
    }

    async fn fresh_in_memory(&self) -> Option<Arc<CatalogSnapshot>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|s| self.file.is_fresh(s))
            .cloned()
    }

    async fn install(&self, snapshot: CatalogSnapshot) -> Arc<CatalogSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write().await = Some(Arc::clone(&snapshot));
        snapshot
    }
}
