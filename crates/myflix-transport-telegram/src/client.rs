//! Bot API implementation of the channel client.

use crate::convert::{channel_message, member_status, recipient, source_error};
use crate::journal::Journal;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use myflix_core::config::ChannelRef;
use myflix_core::source::{
    ChannelClient, ChannelInfo, ChannelMessage, FileStream, Identity, MemberStatus, SourceError,
};
use reqwest::header::RANGE;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, FileId, UpdateKind, UserId};
use thiserror::Error;
use tracing::{debug, info};

/// Updates fetched per `getUpdates` call.
const UPDATES_BATCH: u8 = 100;

/// Connect timeout for file downloads. Downloads themselves are unbounded.
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while building a client
#[derive(Error, Debug)]
pub enum TransportError {
    /// `TELEGRAM_API_URL` is not a URL
    #[error("invalid Bot API url {url:?}: {reason}")]
    InvalidApiUrl {
        /// The configured value
        url: String,
        /// Parser message
        reason: String,
    },
    /// The download client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    /// `TELEGRAM_API_ID` is not a number
    #[error("invalid api id {0:?}")]
    InvalidApiId(String),
    /// The account login did not complete
    #[error("login failed: {0}")]
    Login(String),
    /// The session file could not be read or written
    #[error("session file error: {0}")]
    Session(#[from] std::io::Error),
}

/// Channel client speaking the Telegram Bot API.
pub struct BotApiClient {
    bot: Bot,
    http: reqwest::Client,
    journal: Journal,
}

impl BotApiClient {
    /// Build a client for `token`, optionally against a self-hosted Bot API
    /// server at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] for a bad `api_url` or when the download
    /// client cannot be built.
    pub fn new(
        token: &str,
        api_url: Option<&str>,
        journal: Journal,
    ) -> Result<Self, TransportError> {
        let mut bot = Bot::new(token);
        if let Some(raw) = api_url.map(str::trim).filter(|u| !u.is_empty()) {
            let url = Url::parse(raw).map_err(|e| TransportError::InvalidApiUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;
            info!("Using Bot API server at {url}");
            bot = bot.set_api_url(url);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { bot, http, journal })
    }

    /// Download URL of a file path returned by `getFile`.
    fn file_url(&self, path: &str) -> Result<Url, SourceError> {
        self.bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), path))
            .map_err(|e| SourceError::Api(format!("cannot build file url: {e}")))
    }

    async fn chat_id(&self, channel: &ChannelRef) -> Result<i64, SourceError> {
        match channel {
            ChannelRef::Id(id) => Ok(*id),
            ChannelRef::Username(_) => Ok(self.channel(channel).await?.id),
        }
    }

    /// Move pending channel posts from the update queue into the journal.
    async fn drain_updates(&self) -> Result<(), SourceError> {
        loop {
            let offset = self.journal.offset().await;
            let updates = self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(0)
                .limit(UPDATES_BATCH)
                .allowed_updates(vec![
                    AllowedUpdate::ChannelPost,
                    AllowedUpdate::EditedChannelPost,
                ])
                .await
                .map_err(source_error)?;

            if updates.is_empty() {
                return Ok(());
            }
            let batch = updates.len();

            let mut next_offset = offset;
            let mut posts = Vec::new();
            for update in updates {
                let acknowledged = i32::try_from(update.id.0).map_or(i32::MAX, |id| id.saturating_add(1));
                next_offset = next_offset.max(acknowledged);

                let msg = match update.kind {
                    UpdateKind::ChannelPost(msg) | UpdateKind::EditedChannelPost(msg) => msg,
                    _ => continue,
                };
                if let Some(post) = channel_message(&msg) {
                    posts.push((msg.chat.id.0, post));
                }
            }

            debug!("Journaling {} channel posts from {batch} updates", posts.len());
            self.journal
                .record(posts, next_offset)
                .await
                .map_err(|e| SourceError::Api(format!("cannot write channel journal: {e}")))?;

            if batch < usize::from(UPDATES_BATCH) {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl ChannelClient for BotApiClient {
    async fn identity(&self) -> Result<Identity, SourceError> {
        let me = self.bot.get_me().await.map_err(source_error)?;
        Ok(Identity {
            id: me.user.id.0,
            display_name: me.user.full_name(),
            username: me.user.username.clone(),
        })
    }

    async fn channel(&self, channel: &ChannelRef) -> Result<ChannelInfo, SourceError> {
        let chat = self
            .bot
            .get_chat(recipient(channel))
            .await
            .map_err(source_error)?;
        Ok(ChannelInfo {
            id: chat.id.0,
            title: None,
        })
    }

    async fn membership(
        &self,
        channel: &ChannelRef,
        user_id: u64,
    ) -> Result<MemberStatus, SourceError> {
        let member = self
            .bot
            .get_chat_member(recipient(channel), UserId(user_id))
            .await
            .map_err(source_error)?;
        Ok(member_status(member.status()))
    }

    async fn history(&self, channel: &ChannelRef) -> Result<Vec<ChannelMessage>, SourceError> {
        let chat_id = self.chat_id(channel).await?;
        self.drain_updates().await?;
        Ok(self.journal.posts(chat_id).await)
    }

    async fn open_file(&self, file_id: &str, offset: u64) -> Result<FileStream, SourceError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| match source_error(e) {
                SourceError::Api(text) if text.to_lowercase().contains("file id") => {
                    SourceError::FileNotFound(file_id.to_string())
                }
                other => other,
            })?;

        let mut request = self.http.get(self.file_url(&file.path)?);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Network(e.without_url().to_string()))?;

        let offset = match response.status() {
            StatusCode::PARTIAL_CONTENT => offset,
            // Range ignored; the caller skips ahead
            StatusCode::OK => 0,
            StatusCode::NOT_FOUND => return Err(SourceError::FileNotFound(file_id.to_string())),
            status => {
                return Err(SourceError::Api(format!("file download returned {status}")));
            }
        };

        let chunks = response
            .bytes_stream()
            .map_err(|e| SourceError::Network(e.without_url().to_string()))
            .boxed();
        Ok(FileStream { offset, chunks })
    }

    async fn close(&self) {
        info!("Telegram client closed");
    }
}

/// Client standing in when no usable connection could be configured.
///
/// Every call fails with [`SourceError::Unsupported`], so the catalog stays
/// empty and the reason shows up in the access diagnostics.
#[derive(Debug, Clone)]
pub struct DisconnectedClient {
    reason: String,
}

impl DisconnectedClient {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, SourceError> {
        Err(SourceError::Unsupported(self.reason.clone()))
    }
}

#[async_trait]
impl ChannelClient for DisconnectedClient {
    async fn identity(&self) -> Result<Identity, SourceError> {
        self.fail()
    }

    async fn channel(&self, _channel: &ChannelRef) -> Result<ChannelInfo, SourceError> {
        self.fail()
    }

    async fn membership(
        &self,
        _channel: &ChannelRef,
        _user_id: u64,
    ) -> Result<MemberStatus, SourceError> {
        self.fail()
    }

    async fn history(&self, _channel: &ChannelRef) -> Result<Vec<ChannelMessage>, SourceError> {
        self.fail()
    }

    async fn open_file(&self, _file_id: &str, _offset: u64) -> Result<FileStream, SourceError> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_url_uses_custom_server() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let journal = Journal::open(dir.path().join("journal.json")).await;
        let client = BotApiClient::new("123:abc", Some("http://localhost:8081/"), journal)?;

        let url = client.file_url("videos/file_7.mp4")?;
        assert_eq!(url.as_str(), "http://localhost:8081/file/bot123:abc/videos/file_7.mp4");
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_api_url_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let journal = Journal::open(dir.path().join("journal.json")).await;
        let result = BotApiClient::new("123:abc", Some("not a url"), journal);
        assert!(matches!(result, Err(TransportError::InvalidApiUrl { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_disconnected_client_reports_reason() {
        let client = DisconnectedClient::new("no token");
        assert_eq!(
            client.identity().await,
            Err(SourceError::Unsupported("no token".to_string()))
        );
        assert!(client.open_file("f", 0).await.is_err());
    }
}
