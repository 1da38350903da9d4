//! Catalog source
//!
//! [`ChannelClient`] is the seam to the messaging platform; [`CatalogSource`]
//! turns a channel scan into catalog items. Platform failures never reach the
//! caller of [`CatalogSource::fetch_items`]: they are logged and an empty
//! catalog is returned.

use crate::caption::{parse_caption, MediaMeta};
use crate::catalog::CatalogItem;
use crate::config::{AuthMode, ChannelRef};
use crate::utils::retry_telegram_operation;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Stream of file chunks produced by [`ChannelClient::open_file`].
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Errors surfaced by a [`ChannelClient`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The platform asks us to back off
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Wait requested by the platform
        retry_after: Duration,
    },
    /// Credentials were rejected
    #[error("authentication rejected: {0}")]
    Unauthorized(String),
    /// The channel does not exist or is not visible to us
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
    /// The platform does not know the peer yet
    #[error("peer id invalid: {0}")]
    PeerIdInvalid(String),
    /// Unknown file reference
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// Transport failure; worth retrying
    #[error("network error: {0}")]
    Network(String),
    /// The client cannot operate in the requested mode
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Anything else the platform reported
    #[error("platform error: {0}")]
    Api(String),
}

impl SourceError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Who we are on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub display_name: String,
    pub username: Option<String>,
}

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: i64,
    pub title: Option<String>,
}

/// Our standing in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    /// Owner or administrator.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Owner | Self::Administrator)
    }

    /// Can read the channel.
    #[must_use]
    pub const fn can_read(self) -> bool {
        !matches!(self, Self::Left | Self::Banned)
    }
}

/// Video attached to a channel post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub file_id: String,
    pub file_name: Option<String>,
    /// Seconds
    pub duration: u32,
    /// Bytes
    pub file_size: u64,
    /// File reference of the first thumbnail
    pub thumbnail: Option<String>,
}

/// Platform-neutral view of a channel post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub date: Option<DateTime<Utc>>,
    pub caption: Option<String>,
    pub text: Option<String>,
    pub video: Option<VideoMeta>,
}

/// Interface to the messaging platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Resolve the authenticated identity
    async fn identity(&self) -> Result<Identity, SourceError>;
    /// Resolve a channel
    async fn channel(&self, channel: &ChannelRef) -> Result<ChannelInfo, SourceError>;
    /// Our membership status in a channel
    async fn membership(&self, channel: &ChannelRef, user_id: u64)
        -> Result<MemberStatus, SourceError>;
    /// Channel history, in the order the platform returns it
    async fn history(&self, channel: &ChannelRef) -> Result<Vec<ChannelMessage>, SourceError>;
    /// Chunked download of a file, starting at byte `offset`
    ///
    /// Implementations that cannot seek may start at zero; callers detect
    /// this through [`FileStream::offset`].
    async fn open_file(&self, file_id: &str, offset: u64) -> Result<FileStream, SourceError>;
    /// Release platform resources
    async fn close(&self) {}
}

/// A download in progress.
pub struct FileStream {
    /// Byte offset of the first chunk actually emitted
    pub offset: u64,
    pub chunks: ByteStream,
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Why channel access could not be confirmed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// `identity` failed
    #[error("could not resolve own identity: {0}")]
    Identity(SourceError),
    /// `channel` failed
    #[error("could not access channel {channel}: {source}")]
    Channel {
        channel: String,
        #[source]
        source: SourceError,
    },
    /// `membership` failed
    #[error("could not read membership in {channel}: {source}")]
    Membership {
        channel: String,
        #[source]
        source: SourceError,
    },
    /// Not a member
    #[error("{who} is not a member of {channel} (status: {status:?})")]
    NotMember {
        who: String,
        channel: String,
        status: MemberStatus,
    },
    /// Bot mode without admin rights
    #[error("bot {who} is not an administrator of {channel} (status: {status:?})")]
    NotAdmin {
        who: String,
        channel: String,
        status: MemberStatus,
    },
}

/// Limits applied while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Rescans allowed after a rate-limit signal
    pub max_flood_retries: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            max_flood_retries: 3,
        }
    }
}

/// Builds catalog items from a channel.
pub struct CatalogSource {
    client: Arc<dyn ChannelClient>,
    mode: AuthMode,
    channel: ChannelRef,
    policy: ScanPolicy,
}

impl CatalogSource {
    #[must_use]
    pub fn new(
        client: Arc<dyn ChannelClient>,
        mode: AuthMode,
        channel: ChannelRef,
        policy: ScanPolicy,
    ) -> Self {
        Self {
            client,
            mode,
            channel,
            policy,
        }
    }

    /// The underlying client, shared with the streaming path.
    #[must_use]
    pub fn client(&self) -> Arc<dyn ChannelClient> {
        Arc::clone(&self.client)
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    /// Confirm we can read the channel.
    ///
    /// Personal identities need any non-left membership; bots must administer
    /// the channel.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthenticationError`] describing the first failed check.
    pub async fn verify_access(&self) -> Result<ChannelInfo, AuthenticationError> {
        let channel_name = self.channel.to_string();

        let me = retry_telegram_operation(|| self.client.identity())
            .await
            .map_err(AuthenticationError::Identity)?;
        let who = me
            .username
            .as_ref()
            .map_or_else(|| me.display_name.clone(), |u| format!("@{u}"));

        let info = retry_telegram_operation(|| self.client.channel(&self.channel))
            .await
            .map_err(|source| AuthenticationError::Channel {
                channel: channel_name.clone(),
                source,
            })?;

        let status = retry_telegram_operation(|| self.client.membership(&self.channel, me.id))
            .await
            .map_err(|source| AuthenticationError::Membership {
                channel: channel_name.clone(),
                source,
            })?;

        match self.mode {
            AuthMode::User if !status.can_read() => Err(AuthenticationError::NotMember {
                who,
                channel: channel_name,
                status,
            }),
            AuthMode::Bot if !status.is_admin() => Err(AuthenticationError::NotAdmin {
                who,
                channel: channel_name,
                status,
            }),
            _ => {
                info!(
                    "✅ Channel access confirmed: {} (id {}) as {} [{:?}]",
                    info.title.as_deref().unwrap_or(&channel_name),
                    info.id,
                    who,
                    status
                );
                Ok(info)
            }
        }
    }

    /// Scan the channel into catalog items.
    ///
    /// Never fails: access problems and platform errors are logged and yield
    /// an empty list.
    pub async fn fetch_items(&self) -> Vec<CatalogItem> {
        if let Err(e) = self.verify_access().await {
            self.report_access_error(&e);
            return Vec::new();
        }

        let mut attempt = 0;
        loop {
            match self.client.history(&self.channel).await {
                Ok(messages) => {
                    let items = build_items(&messages);
                    info!(
                        "📡 Fetched {} movies from {} ({} posts scanned)",
                        items.len(),
                        self.channel,
                        messages.len()
                    );
                    return items;
                }
                Err(SourceError::RateLimited { retry_after }) => {
                    if attempt >= self.policy.max_flood_retries {
                        error!(
                            "Rate limited while scanning {} and out of retries ({}); giving up",
                            self.channel, self.policy.max_flood_retries
                        );
                        return Vec::new();
                    }
                    attempt += 1;
                    warn!(
                        "⚠️ Rate limited by Telegram, waiting {}s before rescanning (attempt {}/{})",
                        retry_after.as_secs(),
                        attempt,
                        self.policy.max_flood_retries
                    );
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => {
                    self.report_scan_error(&e);
                    return Vec::new();
                }
            }
        }
    }

    fn report_access_error(&self, e: &AuthenticationError) {
        error!("❌ Channel access check failed: {e}");
        match (self.mode, e) {
            (
                _,
                AuthenticationError::Channel {
                    source: SourceError::PeerIdInvalid(_),
                    ..
                },
            ) => {
                warn!(
                    "The client does not know {} yet. Forward any message from the channel \
                     to the bot, or configure the channel by @username.",
                    self.channel
                );
            }
            (AuthMode::Bot, AuthenticationError::NotAdmin { .. }) => {
                warn!(
                    "Add the bot as an administrator of {} (channel info → Administrators), \
                     or switch to TELEGRAM_AUTH_METHOD=user.",
                    self.channel
                );
            }
            (AuthMode::User, AuthenticationError::NotMember { .. }) => {
                warn!("Join {} with the configured account and refresh.", self.channel);
            }
            _ => {
                warn!(
                    "Check TELEGRAM_CHANNEL_ID={} and TELEGRAM_AUTH_METHOD={}",
                    self.channel, self.mode
                );
            }
        }
    }

    fn report_scan_error(&self, e: &SourceError) {
        match e {
            SourceError::InvalidChannel(_) | SourceError::PeerIdInvalid(_) => {
                error!(
                    "❌ Invalid channel {}: {e}. Use the channel @username or make sure \
                     the account can see it.",
                    self.channel
                );
            }
            _ => error!("❌ Error fetching movies from {}: {e}", self.channel),
        }
    }
}

/// Turn channel posts into catalog items, keeping only video posts.
///
/// Later duplicates of a message id are dropped.
#[must_use]
pub fn build_items(messages: &[ChannelMessage]) -> Vec<CatalogItem> {
    let mut items: Vec<CatalogItem> = Vec::new();

    for message in messages {
        let Some(video) = &message.video else {
            continue;
        };
        if items.iter().any(|i| i.message_id == message.id) {
            continue;
        }

        let media = MediaMeta {
            duration: video.duration,
            file_name: video.file_name.clone(),
        };
        let text = message.caption.as_deref().or(message.text.as_deref());
        let Some(parsed) = parse_caption(text, Some(&media)) else {
            continue;
        };

        tracing::debug!("   ✓ Found: {}", parsed.title);
        items.push(CatalogItem {
            message_id: message.id,
            title: parsed.title,
            year: parsed.year,
            genre: parsed.genre,
            rating: parsed.rating,
            description: parsed.description,
            duration: parsed.duration,
            file_id: video.file_id.clone(),
            file_size: video.file_size,
            thumbnail: video.thumbnail.clone(),
            added_date: message.date,
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> Identity {
        Identity {
            id: 42,
            display_name: "MyFlix".to_string(),
            username: Some("myflix_bot".to_string()),
        }
    }

    fn video_post(id: i64, caption: Option<&str>) -> ChannelMessage {
        ChannelMessage {
            id,
            date: None,
            caption: caption.map(ToString::to_string),
            text: None,
            video: Some(VideoMeta {
                file_id: format!("file-{id}"),
                file_name: Some(format!("video{id}.mp4")),
                duration: 60,
                file_size: 1000,
                thumbnail: Some(format!("thumb-{id}")),
            }),
        }
    }

    fn mock_with_status(status: MemberStatus) -> MockChannelClient {
        let mut mock = MockChannelClient::new();
        mock.expect_identity().returning(|| Ok(me()));
        mock.expect_channel().returning(|_| {
            Ok(ChannelInfo {
                id: -100,
                title: Some("Films".to_string()),
            })
        });
        mock.expect_membership().returning(move |_, _| Ok(status));
        mock
    }

    fn source(mock: MockChannelClient, mode: AuthMode) -> CatalogSource {
        CatalogSource::new(
            Arc::new(mock),
            mode,
            ChannelRef::Username("films".to_string()),
            ScanPolicy {
                max_flood_retries: 2,
            },
        )
    }

    #[test]
    fn test_build_items_keeps_video_posts_only() {
        let mut text_post = video_post(3, Some("just chatting"));
        text_post.video = None;

        let items = build_items(&[
            video_post(1, Some("Title: Heat\nGenre: Crime")),
            text_post,
            video_post(2, None),
            video_post(1, Some("Title: duplicate")),
        ]);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Heat");
        assert_eq!(items[0].file_id, "file-1");
        assert_eq!(items[0].thumbnail.as_deref(), Some("thumb-1"));
        assert_eq!(items[1].title, "video2.mp4");
    }

    #[tokio::test]
    async fn test_bot_mode_requires_admin() {
        let mut mock = mock_with_status(MemberStatus::Member);
        mock.expect_history().never();

        let source = source(mock, AuthMode::Bot);
        assert!(matches!(
            source.verify_access().await,
            Err(AuthenticationError::NotAdmin { .. })
        ));
        assert!(source.fetch_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_mode_accepts_plain_member() {
        let mut mock = mock_with_status(MemberStatus::Member);
        mock.expect_history()
            .returning(|_| Ok(vec![video_post(5, Some("Title: Up"))]));

        let items = source(mock, AuthMode::User).fetch_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message_id, 5);
    }

    #[tokio::test]
    async fn test_user_mode_rejects_left_member() {
        let mock = mock_with_status(MemberStatus::Left);
        let source = source(mock, AuthMode::User);
        assert!(matches!(
            source.verify_access().await,
            Err(AuthenticationError::NotMember { .. })
        ));
    }

    #[tokio::test]
    async fn test_identity_failure_yields_empty_catalog() {
        let mut mock = MockChannelClient::new();
        mock.expect_identity()
            .returning(|| Err(SourceError::Unauthorized("bad token".to_string())));
        mock.expect_history().never();

        assert!(source(mock, AuthMode::Bot).fetch_items().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_triggers_rescan() {
        let mut mock = mock_with_status(MemberStatus::Administrator);
        let mut seq = mockall::Sequence::new();
        mock.expect_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(SourceError::RateLimited {
                    retry_after: Duration::from_secs(30),
                })
            });
        mock.expect_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![video_post(9, Some("Title: Nine"))]));

        let started = tokio::time::Instant::now();
        let items = source(mock, AuthMode::Bot).fetch_items().await;

        assert_eq!(items.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_are_capped() {
        let mut mock = mock_with_status(MemberStatus::Owner);
        // Initial scan plus two rescans
        mock.expect_history().times(3).returning(|_| {
            Err(SourceError::RateLimited {
                retry_after: Duration::from_secs(5),
            })
        });

        assert!(source(mock, AuthMode::Bot).fetch_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_error_yields_empty_catalog() {
        let mut mock = mock_with_status(MemberStatus::Administrator);
        mock.expect_history()
            .returning(|_| Err(SourceError::InvalidChannel("gone".to_string())));

        assert!(source(mock, AuthMode::Bot).fetch_items().await.is_empty());
    }
}
