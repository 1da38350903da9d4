//! MTProto implementation of the channel client, logged in as a personal
//! account.
//!
//! The session is kept in `CACHE_DIR/myflix_user.session`; the first start
//! asks for the login code (and the cloud password, if set) on stdin.

use crate::client::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use grammers_client::types::{Chat, Downloadable, Media, Message};
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_mtsender::InvocationError;
use grammers_session::{PackedChat, Session};
use myflix_core::config::ChannelRef;
use myflix_core::source::{
    ChannelClient, ChannelInfo, ChannelMessage, FileStream, Identity, MemberStatus, SourceError,
    VideoMeta,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// File name of the user session inside the cache directory.
pub const SESSION_FILE: &str = "myflix_user.session";

/// Download piece size; the largest MTProto allows.
const DOWNLOAD_CHUNK: i32 = 512 * 1024;

/// Offset between Bot API style channel ids (`-100…`) and bare MTProto ids.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Bare MTProto id for a chat id written either way.
pub const fn bare_chat_id(id: i64) -> i64 {
    if id <= -CHANNEL_ID_OFFSET {
        id.saturating_neg() - CHANNEL_ID_OFFSET
    } else {
        id.saturating_abs()
    }
}

/// Bot API style id of a bare channel id.
pub const fn channel_chat_id(bare: i64) -> i64 {
    -CHANNEL_ID_OFFSET - bare
}

/// `file_id` handed out for the video in message `message_id` of `chat`.
pub fn video_file_id(chat: i64, message_id: i32) -> String {
    format!("{chat}:{message_id}")
}

/// Inverse of [`video_file_id`].
pub fn parse_file_id(file_id: &str) -> Option<(i64, i32)> {
    let (chat, message) = file_id.split_once(':')?;
    Some((chat.parse().ok()?, message.parse().ok()?))
}

/// Classify an RPC error by its name.
pub fn rpc_source_error(name: &str, value: Option<u32>) -> SourceError {
    match name {
        "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT" => SourceError::RateLimited {
            retry_after: Duration::from_secs(u64::from(value.unwrap_or(1))),
        },
        "PEER_ID_INVALID" => SourceError::PeerIdInvalid(name.to_string()),
        "CHANNEL_INVALID" | "CHANNEL_PRIVATE" | "CHAT_ID_INVALID" | "USERNAME_INVALID"
        | "USERNAME_NOT_OCCUPIED" => SourceError::InvalidChannel(name.to_string()),
        "AUTH_KEY_UNREGISTERED" | "AUTH_KEY_INVALID" | "SESSION_REVOKED" | "SESSION_EXPIRED"
        | "USER_DEACTIVATED" => SourceError::Unauthorized(name.to_string()),
        "FILE_REFERENCE_EXPIRED" | "FILE_ID_INVALID" | "MESSAGE_ID_INVALID" => {
            SourceError::FileNotFound(name.to_string())
        }
        _ => SourceError::Api(name.to_string()),
    }
}

fn invocation_error(e: InvocationError) -> SourceError {
    match e {
        InvocationError::Rpc(rpc) => rpc_source_error(&rpc.name, rpc.value),
        other => SourceError::Network(other.to_string()),
    }
}

/// Video metadata for a document, when it is one.
pub fn video_meta(
    file_id: String,
    name: &str,
    mime_type: Option<&str>,
    size: i64,
) -> Option<VideoMeta> {
    if !mime_type.is_some_and(|m| m.starts_with("video/")) {
        return None;
    }
    Some(VideoMeta {
        file_id,
        file_name: Some(name.to_string()).filter(|n| !n.is_empty()),
        // Not exposed for documents; the catalog shows it as unknown
        duration: 0,
        file_size: u64::try_from(size).unwrap_or_default(),
        thumbnail: None,
    })
}

fn channel_message(chat: i64, message: &Message) -> ChannelMessage {
    let video = match message.media() {
        Some(Media::Document(doc)) => video_meta(
            video_file_id(chat, message.id()),
            doc.name(),
            doc.mime_type(),
            doc.size(),
        ),
        _ => None,
    };
    let body = Some(message.text().to_string()).filter(|t| !t.is_empty());
    let (caption, text) = if video.is_some() { (body, None) } else { (None, body) };

    ChannelMessage {
        id: i64::from(message.id()),
        date: Some(message.date()),
        caption,
        text,
        video,
    }
}

/// Read one line from the terminal.
async fn prompt(question: &'static str) -> Result<String, TransportError> {
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .map_err(|e| TransportError::Login(e.to_string()))??;

    let line = line.trim().to_string();
    if line.is_empty() {
        return Err(TransportError::Login("no input on stdin".to_string()));
    }
    Ok(line)
}

/// Channel client logged in as a personal account.
pub struct UserClient {
    client: Client,
    session_path: PathBuf,
    /// Resolved chats by bare id and by lowercase username.
    chats: Mutex<HashMap<String, PackedChat>>,
}

impl UserClient {
    /// Connect and, when the stored session is not authorized, log in
    /// interactively.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the api id is not numeric, the
    /// session cannot be read or saved, or the login fails.
    pub async fn connect(
        api_id: &str,
        api_hash: &str,
        phone_number: &str,
        cache_dir: &Path,
    ) -> Result<Self, TransportError> {
        let api_id: i32 = api_id
            .trim()
            .parse()
            .map_err(|_| TransportError::InvalidApiId(api_id.to_string()))?;

        tokio::fs::create_dir_all(cache_dir).await?;
        let session_path = cache_dir.join(SESSION_FILE);
        let session = Session::load_file_or_create(&session_path)?;

        info!("🔌 Connecting to Telegram as a user account...");
        let client = Client::connect(Config {
            session,
            api_id,
            api_hash: api_hash.to_string(),
            params: InitParams {
                catch_up: false,
                ..Default::default()
            },
        })
        .await
        .map_err(|e| TransportError::Login(e.to_string()))?;

        let this = Self {
            client,
            session_path,
            chats: Mutex::new(HashMap::new()),
        };
        this.ensure_login(phone_number).await?;
        Ok(this)
    }

    async fn ensure_login(&self, phone_number: &str) -> Result<(), TransportError> {
        let authorized = self
            .client
            .is_authorized()
            .await
            .map_err(|e| TransportError::Login(e.to_string()))?;
        if authorized {
            debug!("Stored user session is authorized");
            return Ok(());
        }

        info!("🔐 Requesting login code...");
        let token = self
            .client
            .request_login_code(phone_number)
            .await
            .map_err(|e| TransportError::Login(e.to_string()))?;
        let code = prompt("Enter the Telegram login code: ").await?;

        match self.client.sign_in(&token, &code).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = prompt("Enter the two-step verification password: ").await?;
                self.client
                    .check_password(password_token, password)
                    .await
                    .map_err(|e| TransportError::Login(e.to_string()))?;
            }
            Err(e) => return Err(TransportError::Login(e.to_string())),
        }

        self.save_session()?;
        info!("✅ Logged in; session saved");
        Ok(())
    }

    fn save_session(&self) -> Result<(), TransportError> {
        self.client.session().save_to_file(&self.session_path)?;
        Ok(())
    }

    async fn remember(&self, key: String, chat: &Chat) -> PackedChat {
        let packed = chat.pack();
        let mut chats = self.chats.lock().await;
        chats.insert(bare_chat_id(chat.id()).to_string(), packed);
        chats.insert(key, packed);
        packed
    }

    /// Scan the dialog list for a chat with `bare` id.
    async fn find_dialog(&self, bare: i64) -> Result<Option<Chat>, SourceError> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(invocation_error)? {
            if dialog.chat().id() == bare {
                return Ok(Some(dialog.chat().clone()));
            }
        }
        Ok(None)
    }

    async fn resolve(&self, channel: &ChannelRef) -> Result<Chat, SourceError> {
        let chat = match channel {
            ChannelRef::Username(name) => self
                .client
                .resolve_username(name)
                .await
                .map_err(invocation_error)?,
            ChannelRef::Id(id) => self.find_dialog(bare_chat_id(*id)).await?,
        };
        let chat = chat.ok_or_else(|| SourceError::InvalidChannel(channel.to_string()))?;
        self.remember(cache_key(channel), &chat).await;
        Ok(chat)
    }

    async fn packed(&self, channel: &ChannelRef) -> Result<PackedChat, SourceError> {
        if let Some(packed) = self.chats.lock().await.get(&cache_key(channel)) {
            return Ok(*packed);
        }
        Ok(self.resolve(channel).await?.pack())
    }

    async fn packed_by_bare_id(&self, bare: i64) -> Result<PackedChat, SourceError> {
        if let Some(packed) = self.chats.lock().await.get(&bare.to_string()) {
            return Ok(*packed);
        }
        let chat = self
            .find_dialog(bare)
            .await?
            .ok_or_else(|| SourceError::PeerIdInvalid(bare.to_string()))?;
        Ok(self.remember(bare.to_string(), &chat).await)
    }
}

fn cache_key(channel: &ChannelRef) -> String {
    match channel {
        ChannelRef::Username(name) => name.to_lowercase(),
        ChannelRef::Id(id) => bare_chat_id(*id).to_string(),
    }
}

#[async_trait]
impl ChannelClient for UserClient {
    async fn identity(&self) -> Result<Identity, SourceError> {
        let me = self.client.get_me().await.map_err(invocation_error)?;
        Ok(Identity {
            id: u64::try_from(me.id()).unwrap_or_default(),
            display_name: me.full_name(),
            username: me.username().map(ToString::to_string),
        })
    }

    async fn channel(&self, channel: &ChannelRef) -> Result<ChannelInfo, SourceError> {
        let chat = self.resolve(channel).await?;
        let id = match &chat {
            Chat::Channel(_) => channel_chat_id(chat.id()),
            _ => chat.id(),
        };
        Ok(ChannelInfo {
            id,
            title: Some(chat.name().to_string()).filter(|t| !t.is_empty()),
        })
    }

    async fn membership(
        &self,
        channel: &ChannelRef,
        _user_id: u64,
    ) -> Result<MemberStatus, SourceError> {
        let chat = self.resolve(channel).await?;
        if self.find_dialog(chat.id()).await?.is_some() {
            Ok(MemberStatus::Member)
        } else {
            Ok(MemberStatus::Left)
        }
    }

    async fn history(&self, channel: &ChannelRef) -> Result<Vec<ChannelMessage>, SourceError> {
        let packed = self.packed(channel).await?;
        let chat = packed.id;

        let mut messages = Vec::new();
        let mut iter = self.client.iter_messages(packed);
        while let Some(message) = iter.next().await.map_err(invocation_error)? {
            messages.push(channel_message(chat, &message));
        }
        debug!("Read {} posts from {channel}", messages.len());
        Ok(messages)
    }

    async fn open_file(&self, file_id: &str, offset: u64) -> Result<FileStream, SourceError> {
        let (chat, message_id) =
            parse_file_id(file_id).ok_or_else(|| SourceError::FileNotFound(file_id.to_string()))?;
        let packed = self.packed_by_bare_id(chat).await?;

        let media = self
            .client
            .get_messages_by_id(packed, &[message_id])
            .await
            .map_err(invocation_error)?
            .into_iter()
            .flatten()
            .next()
            .and_then(|message| message.media())
            .ok_or_else(|| SourceError::FileNotFound(file_id.to_string()))?;

        // Downloads move in whole pieces; the caller trims the head.
        let piece = u64::from(DOWNLOAD_CHUNK.unsigned_abs());
        let skip = offset / piece;
        let download = self
            .client
            .iter_download(&Downloadable::Media(media))
            .chunk_size(DOWNLOAD_CHUNK)
            .skip_chunks(i32::try_from(skip).unwrap_or(i32::MAX));

        let chunks = stream::unfold(Some(download), |state| async move {
            let mut download = state?;
            match download.next().await {
                Ok(Some(chunk)) => Some((Ok(Bytes::from(chunk)), Some(download))),
                Ok(None) => None,
                Err(e) => Some((Err(invocation_error(e)), None)),
            }
        })
        .boxed();

        Ok(FileStream {
            offset: skip * piece,
            chunks,
        })
    }

    async fn close(&self) {
        if let Err(e) = self.save_session() {
            warn!("⚠️ Could not save user session: {e}");
        }
        info!("Telegram user client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_chat_id_accepts_both_forms() {
        assert_eq!(bare_chat_id(-1_001_234_567_890), 1_234_567_890);
        assert_eq!(bare_chat_id(1_234_567_890), 1_234_567_890);
        assert_eq!(bare_chat_id(-4_567), 4_567);
        assert_eq!(channel_chat_id(1_234_567_890), -1_001_234_567_890);
    }

    #[test]
    fn test_file_id_carries_chat_and_message() {
        let id = video_file_id(1_234_567_890, 42);
        assert_eq!(parse_file_id(&id), Some((1_234_567_890, 42)));
        assert_eq!(parse_file_id("BAACAgIAAx0"), None);
        assert_eq!(parse_file_id("12:abc"), None);
    }

    #[test]
    fn test_flood_wait_becomes_rate_limit() {
        assert_eq!(
            rpc_source_error("FLOOD_WAIT", Some(30)),
            SourceError::RateLimited {
                retry_after: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_rpc_errors_are_classified() {
        assert!(matches!(
            rpc_source_error("PEER_ID_INVALID", None),
            SourceError::PeerIdInvalid(_)
        ));
        assert!(matches!(
            rpc_source_error("CHANNEL_PRIVATE", None),
            SourceError::InvalidChannel(_)
        ));
        assert!(matches!(
            rpc_source_error("AUTH_KEY_UNREGISTERED", None),
            SourceError::Unauthorized(_)
        ));
        assert!(matches!(
            rpc_source_error("FILE_REFERENCE_EXPIRED", None),
            SourceError::FileNotFound(_)
        ));
        assert!(matches!(
            rpc_source_error("MEDIA_EMPTY", None),
            SourceError::Api(name) if name == "MEDIA_EMPTY"
        ));
    }

    #[test]
    fn test_only_video_documents_are_indexed() {
        let video = video_meta("1:2".to_string(), "heat.mkv", Some("video/x-matroska"), 2048);
        assert_eq!(video.as_ref().map(|v| v.file_size), Some(2048));
        assert_eq!(video.and_then(|v| v.file_name), Some("heat.mkv".to_string()));

        assert!(video_meta("1:3".to_string(), "notes.pdf", Some("application/pdf"), 10).is_none());
        assert!(video_meta("1:4".to_string(), "", None, 10).is_none());
        let unnamed = video_meta("1:5".to_string(), "", Some("video/mp4"), -1);
        assert_eq!(unnamed.map(|v| (v.file_name, v.file_size)), Some((None, 0)));
    }
}
