//! Working directories and temp file housekeeping.

use crate::config::Settings;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Create the cache and temp directories if missing.
///
/// # Errors
///
/// Returns the I/O error of the first directory that cannot be created.
pub async fn ensure_dirs(settings: &Settings) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&settings.cache_dir).await?;
    tokio::fs::create_dir_all(&settings.temp_download_dir).await?;
    Ok(())
}

/// Where the thumbnail of `message_id` is kept.
#[must_use]
pub fn thumbnail_path(temp_dir: &Path, message_id: i64) -> PathBuf {
    temp_dir.join(format!("thumb_{message_id}.jpg"))
}

/// Remove regular files in `dir` last modified more than `max_age` ago.
///
/// Returns how many files were removed. Errors are logged and skipped; a
/// missing directory counts as clean.
pub async fn clean_temp_files(dir: &Path, max_age: Duration) -> usize {
    sweep(dir, Some(max_age)).await
}

/// Remove every regular file in `dir`; used on shutdown.
pub async fn purge_temp_files(dir: &Path) -> usize {
    sweep(dir, None).await
}

async fn sweep(dir: &Path, max_age: Option<Duration>) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("⚠️ Error cleaning temp files in {}: {e}", dir.display());
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("⚠️ Error reading {}: {e}", dir.display());
                break;
            }
        };

        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if let Some(max_age) = max_age {
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                info!("🗑️ Cleaned temp file: {}", entry.file_name().to_string_lossy());
                removed += 1;
            }
            Err(e) => warn!("⚠️ Could not remove {}: {e}", entry.path().display()),
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_only_old_files_are_removed() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("old.bin"), b"x").await?;
        tokio::fs::create_dir(dir.path().join("nested")).await?;

        assert_eq!(clean_temp_files(dir.path(), Duration::from_secs(3600)).await, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(clean_temp_files(dir.path(), Duration::from_millis(5)).await, 1);
        assert!(!dir.path().join("old.bin").exists());
        // Directories are left alone
        assert!(dir.path().join("nested").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_removes_fresh_files() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("a"), b"1").await?;
        tokio::fs::write(dir.path().join("b"), b"2").await?;

        assert_eq!(purge_temp_files(dir.path()).await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_dir_is_clean() {
        let dir = std::env::temp_dir().join("myflix-does-not-exist-7f3a");
        assert_eq!(clean_temp_files(&dir, Duration::ZERO).await, 0);
    }

    #[tokio::test]
    async fn test_ensure_dirs_creates_both() -> std::io::Result<()> {
        let root = TempDir::new()?;
        let settings = Settings {
            cache_dir: root.path().join("cache"),
            temp_download_dir: root.path().join("tmp").join("downloads"),
            ..Settings::default()
        };

        ensure_dirs(&settings).await?;
        assert!(settings.cache_dir.is_dir());
        assert!(settings.temp_download_dir.is_dir());
        assert_eq!(
            thumbnail_path(&settings.temp_download_dir, 42),
            settings.temp_download_dir.join("thumb_42.jpg")
        );
        Ok(())
    }
}
