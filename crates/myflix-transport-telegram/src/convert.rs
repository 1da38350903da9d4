//! Mapping between Bot API types and the core channel model.

use myflix_core::config::ChannelRef;
use myflix_core::source::{ChannelMessage, MemberStatus, SourceError, VideoMeta};
use std::time::Duration;
use teloxide::types::{ChatId, ChatMemberStatus, Message, Recipient};
use teloxide::{ApiError, RequestError};

/// Recipient addressing `channel` in Bot API calls.
pub fn recipient(channel: &ChannelRef) -> Recipient {
    match channel {
        ChannelRef::Username(name) => Recipient::ChannelUsername(format!("@{name}")),
        ChannelRef::Id(id) => Recipient::Id(ChatId(*id)),
    }
}

pub const fn member_status(status: ChatMemberStatus) -> MemberStatus {
    match status {
        ChatMemberStatus::Owner => MemberStatus::Owner,
        ChatMemberStatus::Administrator => MemberStatus::Administrator,
        ChatMemberStatus::Member => MemberStatus::Member,
        ChatMemberStatus::Restricted => MemberStatus::Restricted,
        ChatMemberStatus::Left => MemberStatus::Left,
        ChatMemberStatus::Banned => MemberStatus::Banned,
    }
}

/// Classify a failed Bot API request.
pub fn source_error(e: RequestError) -> SourceError {
    match e {
        RequestError::RetryAfter(secs) => SourceError::RateLimited {
            retry_after: Duration::from_secs(u64::from(secs.seconds())),
        },
        RequestError::Api(ApiError::InvalidToken) => {
            SourceError::Unauthorized("bot token rejected".to_string())
        }
        RequestError::Api(ApiError::ChatNotFound) => {
            SourceError::InvalidChannel("chat not found".to_string())
        }
        RequestError::Api(api) => {
            let text = api.to_string();
            if text.contains("PEER_ID_INVALID") {
                SourceError::PeerIdInvalid(text)
            } else {
                SourceError::Api(text)
            }
        }
        RequestError::Network(e) => SourceError::Network(e.to_string()),
        RequestError::Io(e) => SourceError::Network(e.to_string()),
        other => SourceError::Api(other.to_string()),
    }
}

/// Core view of a channel post; `None` for posts that carry nothing we index.
pub fn channel_message(msg: &Message) -> Option<ChannelMessage> {
    let video = msg.video().map(|video| VideoMeta {
        file_id: video.file.id.0.clone(),
        file_name: video.file_name.clone(),
        duration: video.duration.seconds(),
        file_size: u64::from(video.file.size),
        thumbnail: video.thumbnail.as_ref().map(|t| t.file.id.0.clone()),
    });

    let caption = msg.caption().map(ToString::to_string);
    let text = msg.text().map(ToString::to_string);
    if video.is_none() && caption.is_none() && text.is_none() {
        return None;
    }

    Some(ChannelMessage {
        id: i64::from(msg.id.0),
        date: Some(msg.date),
        caption,
        text,
        video,
    })
}
