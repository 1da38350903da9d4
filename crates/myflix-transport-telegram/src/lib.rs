//! Telegram transport for MyFlix.
//!
//! Implements the core channel client on the Telegram Bot API (bot mode)
//! and on MTProto as a personal account (user mode).

/// Bot API channel client.
pub mod client;
/// Bot API to core type conversions.
pub mod convert;
/// Persisted channel post journal.
pub mod journal;
/// Personal account channel client.
pub mod user;

pub use client::{BotApiClient, DisconnectedClient, TransportError};
pub use user::UserClient;

use journal::{Journal, JOURNAL_FILE};
use myflix_core::config::{Credentials, Settings};
use myflix_core::source::ChannelClient;
use std::sync::Arc;
use tracing::{error, info};

/// Build the channel client for `settings`.
///
/// Never fails: when no usable connection can be configured a
/// [`DisconnectedClient`] carrying the reason is returned, and the server
/// runs with an empty catalog.
pub async fn connect(settings: &Settings) -> Arc<dyn ChannelClient> {
    match settings.credentials() {
        Ok(Credentials::Bot { token }) => {
            let journal = Journal::open(settings.cache_dir.join(JOURNAL_FILE)).await;
            match BotApiClient::new(&token, settings.telegram_api_url.as_deref(), journal) {
                Ok(client) => {
                    info!("✅ Telegram Bot API client ready");
                    Arc::new(client)
                }
                Err(e) => {
                    error!("❌ Cannot create Telegram client: {e}");
                    Arc::new(DisconnectedClient::new(e.to_string()))
                }
            }
        }
        Ok(Credentials::User {
            api_id,
            api_hash,
            phone_number,
        }) => match UserClient::connect(&api_id, &api_hash, &phone_number, &settings.cache_dir).await
        {
            Ok(client) => {
                info!("✅ Telegram user client ready");
                Arc::new(client)
            }
            Err(e) => {
                error!("❌ Telegram user login failed: {e}");
                Arc::new(DisconnectedClient::new(e.to_string()))
            }
        },
        Err(issue) => {
            error!("❌ Telegram is not configured: {issue}");
            Arc::new(DisconnectedClient::new(issue.to_string()))
        }
    }
}
