//! Persisted record of channel posts.
//!
//! The Bot API only delivers posts as updates; it cannot list a channel's
//! history. Every post seen through `getUpdates` is kept here so a rescan
//! sees the whole channel, not just what arrived since the last one.

use myflix_core::source::ChannelMessage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// File name of the journal inside the cache directory.
pub const JOURNAL_FILE: &str = "channel_journal.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JournalEntry {
    chat_id: i64,
    message: ChannelMessage,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalState {
    /// Next `getUpdates` offset
    offset: i32,
    entries: Vec<JournalEntry>,
}

/// Channel posts keyed by chat and message id.
pub struct Journal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl Journal {
    /// Open the journal at `path`, starting empty when it is missing or
    /// unreadable.
    pub async fn open(path: PathBuf) -> Self {
        let state = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("⚠️ Channel journal at {} is unreadable, starting fresh: {e}", path.display());
                JournalState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JournalState::default(),
            Err(e) => {
                warn!("⚠️ Cannot read channel journal {}: {e}", path.display());
                JournalState::default()
            }
        };
        info!(
            "Channel journal: {} posts recorded (update offset {})",
            state.entries.len(),
            state.offset
        );

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset to pass to the next `getUpdates` call.
    pub async fn offset(&self) -> i32 {
        self.state.lock().await.offset
    }

    /// Record posts and advance the update offset, then persist.
    ///
    /// A post already present is replaced, so edits win over the original.
    /// The lock is held until the file is renamed into place, so concurrent
    /// writers never share the temp file and disk order matches memory order.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the journal cannot be written.
    pub async fn record(
        &self,
        posts: Vec<(i64, ChannelMessage)>,
        next_offset: i32,
    ) -> std::io::Result<()> {
        let mut state = self.state.lock().await;
        state.offset = state.offset.max(next_offset);

        for (chat_id, message) in posts {
            let existing = state
                .entries
                .iter()
                .position(|e| e.chat_id == chat_id && e.message.id == message.id);
            match existing {
                Some(i) => state.entries[i].message = message,
                None => state.entries.push(JournalEntry { chat_id, message }),
            }
        }

        let json = serde_json::to_vec(&*state).map_err(std::io::Error::other)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        drop(state);
        Ok(())
    }

    /// Posts of `chat_id` in ascending message id order.
    pub async fn posts(&self, chat_id: i64) -> Vec<ChannelMessage> {
        let state = self.state.lock().await;
        let mut posts: Vec<ChannelMessage> = state
            .entries
            .iter()
            .filter(|e| e.chat_id == chat_id)
            .map(|e| e.message.clone())
            .collect();
        posts.sort_by_key(|m| m.id);
        posts
    }
}
