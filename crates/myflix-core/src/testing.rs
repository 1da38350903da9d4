//! In-memory channel for tests.
//!
//! Enabled by the `testing` feature so downstream crates can drive the
//! catalog and streaming paths without a network.

use crate::config::ChannelRef;
use crate::source::{
    ChannelClient, ChannelInfo, ChannelMessage, FileStream, Identity, MemberStatus, SourceError,
    VideoMeta,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A channel that lives in memory.
pub struct FakeChannel {
    status: MemberStatus,
    messages: Mutex<Vec<ChannelMessage>>,
    files: HashMap<String, Vec<u8>>,
    history_error: Option<SourceError>,
    piece: usize,
    identity_calls: AtomicUsize,
    history_calls: AtomicUsize,
    opened: Mutex<Vec<(String, u64)>>,
}

impl Default for FakeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChannel {
    /// An empty channel administered by the fake identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: MemberStatus::Administrator,
            messages: Mutex::new(Vec::new()),
            files: HashMap::new(),
            history_error: None,
            piece: 64 * 1024,
            identity_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    /// Make every history scan fail with `error`.
    #[must_use]
    pub fn with_history_error(mut self, error: SourceError) -> Self {
        self.history_error = Some(error);
        self
    }

    /// Size of the chunks files are served in.
    #[must_use]
    pub fn with_piece_size(mut self, piece: usize) -> Self {
        self.piece = piece.max(1);
        self
    }

    /// Post a video with `caption` backed by `data`.
    #[must_use]
    pub fn with_video(mut self, id: i64, caption: &str, data: Vec<u8>) -> Self {
        let file_id = format!("file-{id}");
        let message = ChannelMessage {
            id,
            date: Some(Utc::now()),
            caption: Some(caption.to_string()),
            text: None,
            video: Some(VideoMeta {
                file_id: file_id.clone(),
                file_name: Some(format!("video_{id}.mp4")),
                duration: 5400,
                file_size: data.len() as u64,
                thumbnail: None,
            }),
        };
        self.files.insert(file_id, data);
        self.push(message);
        self
    }

    /// Attach a thumbnail to the video posted as `id`.
    #[must_use]
    pub fn with_thumbnail(mut self, id: i64, data: Vec<u8>) -> Self {
        let thumb_id = format!("thumb-{id}");
        {
            let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(video) = messages
                .iter_mut()
                .find(|m| m.id == id)
                .and_then(|m| m.video.as_mut())
            {
                video.thumbnail = Some(thumb_id.clone());
            }
        }
        self.files.insert(thumb_id, data);
        self
    }

    /// Add a post at runtime.
    pub fn push(&self, message: ChannelMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// How many identity lookups were made.
    #[must_use]
    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    /// How many history scans were made.
    #[must_use]
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// `(file_id, offset)` of every file opened so far.
    #[must_use]
    pub fn opened(&self) -> Vec<(String, u64)> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChannelClient for FakeChannel {
    async fn identity(&self) -> Result<Identity, SourceError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Identity {
            id: 1,
            display_name: "Fake".to_string(),
            username: Some("fake_bot".to_string()),
        })
    }

    async fn channel(&self, _channel: &ChannelRef) -> Result<ChannelInfo, SourceError> {
        Ok(ChannelInfo {
            id: -100_123,
            title: Some("Fake channel".to_string()),
        })
    }

    async fn membership(
        &self,
        _channel: &ChannelRef,
        _user_id: u64,
    ) -> Result<MemberStatus, SourceError> {
        Ok(self.status)
    }

    async fn history(&self, _channel: &ChannelRef) -> Result<Vec<ChannelMessage>, SourceError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.history_error {
            return Err(e.clone());
        }
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn open_file(&self, file_id: &str, offset: u64) -> Result<FileStream, SourceError> {
        let data = self
            .files
            .get(file_id)
            .ok_or_else(|| SourceError::FileNotFound(file_id.to_string()))?;
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((file_id.to_string(), offset));

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let chunks: Vec<Result<Bytes, SourceError>> = data[start..]
            .chunks(self.piece)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(FileStream {
            offset: start as u64,
            chunks: stream::iter(chunks).boxed(),
        })
    }
}
