//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and
//! validates the Telegram credentials the catalog scan depends on.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// File name of the catalog snapshot inside the cache directory.
pub const MOVIES_CACHE_FILE: &str = "movies.json";

/// Sliding window used by the per-client rate limiter.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// How often the background janitor sweeps the temp directory.
pub const TEMP_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Initial delay between retries of a transient Telegram API failure.
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound on the delay between retries.
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 8_000;
/// Retries attempted for a transient Telegram API failure.
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

const DEFAULT_CATEGORIES: &[&str] = &[
    "Action",
    "Comedy",
    "Drama",
    "Horror",
    "Romance",
    "Sci-Fi",
    "Thriller",
    "Animation",
    "Documentary",
    "Series",
];

// Placeholders from the sample `.env` template; treated as unset.
const PLACEHOLDER_API_ID: &str = "YOUR_API_ID";
const PLACEHOLDER_API_HASH: &str = "YOUR_API_HASH";
const PLACEHOLDER_BOT_TOKEN: &str = "YOUR_BOT_TOKEN";
const PLACEHOLDER_PHONE: &str = "YOUR_PHONE_NUMBER";
const PLACEHOLDER_CHANNEL: &str = "@myflixchannel";

/// Which identity the catalog scan authenticates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Service identity: a bot token. The bot must administer the channel.
    Bot,
    /// Personal identity: a user account that is a member of the channel.
    User,
}

impl FromStr for AuthMode {
    type Err = ConfigIssue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bot" => Ok(Self::Bot),
            "user" => Ok(Self::User),
            other => Err(ConfigIssue::InvalidAuthMethod(other.to_string())),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bot => f.write_str("bot"),
            Self::User => f.write_str("user"),
        }
    }
}

/// A channel as configured: `@username` or a numeric chat id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRef {
    /// Public channel username, without the leading `@`.
    Username(String),
    /// Numeric chat id, e.g. `-1001234567890`.
    Id(i64),
}

impl FromStr for ChannelRef {
    type Err = ConfigIssue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i64>() {
            return Ok(Self::Id(id));
        }
        let name = s.trim_start_matches('@');
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ConfigIssue::InvalidChannel(s.to_string()));
        }
        Ok(Self::Username(name.to_string()))
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(name) => write!(f, "@{name}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Credentials resolved for the selected [`AuthMode`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Bot API token.
    Bot {
        /// Token issued by @BotFather.
        token: String,
    },
    /// MTProto user login.
    User {
        /// Application id from my.telegram.org.
        api_id: String,
        /// Application hash from my.telegram.org.
        api_hash: String,
        /// Phone number with country code.
        phone_number: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bot { .. } => f.write_str("Credentials::Bot { token: [MASKED] }"),
            Self::User { api_id, .. } => write!(
                f,
                "Credentials::User {{ api_id: {api_id}, api_hash: [MASKED], phone_number: [MASKED] }}"
            ),
        }
    }
}

/// A configuration problem detected at startup.
///
/// Issues are reported, not fatal: the server still starts and serves
/// whatever the cache holds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    /// `TELEGRAM_API_ID` missing or placeholder.
    #[error("TELEGRAM_API_ID is not set (required for user mode)")]
    MissingApiId,
    /// `TELEGRAM_API_HASH` missing or placeholder.
    #[error("TELEGRAM_API_HASH is not set (required for user mode)")]
    MissingApiHash,
    /// Unknown `TELEGRAM_AUTH_METHOD`.
    #[error("TELEGRAM_AUTH_METHOD must be 'bot' or 'user', got '{0}'")]
    InvalidAuthMethod(String),
    /// `TELEGRAM_BOT_TOKEN` missing in bot mode.
    #[error("TELEGRAM_BOT_TOKEN is not set (required for bot mode)")]
    MissingBotToken,
    /// `TELEGRAM_PHONE_NUMBER` missing in user mode.
    #[error("TELEGRAM_PHONE_NUMBER is not set (required for user mode)")]
    MissingPhoneNumber,
    /// `TELEGRAM_CHANNEL_ID` missing or placeholder.
    #[error("TELEGRAM_CHANNEL_ID is not set")]
    MissingChannel,
    /// `TELEGRAM_CHANNEL_ID` is neither a username nor a numeric id.
    #[error("TELEGRAM_CHANNEL_ID '{0}' is neither @username nor a numeric id")]
    InvalidChannel(String),
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// MTProto application id
    pub telegram_api_id: Option<String>,
    /// MTProto application hash
    pub telegram_api_hash: Option<String>,
    /// `bot` or `user`
    #[serde(default = "default_auth_method")]
    pub telegram_auth_method: String,
    /// Bot API token (bot mode)
    pub telegram_bot_token: Option<String>,
    /// Phone number with country code (user mode)
    pub telegram_phone_number: Option<String>,
    /// Channel username (`@name`) or numeric id
    pub telegram_channel_id: Option<String>,
    /// Base URL of a self-hosted Bot API server
    pub telegram_api_url: Option<String>,

    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the catalog snapshot and transport state
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Snapshot validity window in hours
    #[serde(default = "default_cache_expiry_hours")]
    pub cache_expiry_hours: u64,

    /// Maximum size of a streamed chunk in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Directory for downloaded thumbnails
    #[serde(default = "default_temp_dir")]
    pub temp_download_dir: PathBuf,
    /// Temp file retention in seconds
    #[serde(default = "default_max_temp_file_age")]
    pub max_temp_file_age: u64,

    /// Enables the per-client request limiter
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    /// Default per-client cap
    #[serde(default = "default_max_requests")]
    pub max_requests_per_minute: u32,
    /// Cap applied to `/stream`
    #[serde(default = "default_stream_requests")]
    pub stream_requests_per_minute: u32,
    /// Cap applied to `/api/refresh`
    #[serde(default = "default_refresh_requests")]
    pub refresh_requests_per_minute: u32,

    /// Rescans allowed after the platform asks us to back off
    #[serde(default = "default_flood_wait_retries")]
    pub flood_wait_max_retries: u32,

    /// Comma-separated category list shown on the home page
    #[serde(rename = "categories")]
    pub categories_str: Option<String>,
}

fn default_auth_method() -> String {
    "user".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    5000
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

const fn default_cache_expiry_hours() -> u64 {
    24
}

const fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp_downloads")
}

const fn default_max_temp_file_age() -> u64 {
    3600
}

const fn default_true() -> bool {
    true
}

const fn default_max_requests() -> u32 {
    30
}

const fn default_stream_requests() -> u32 {
    10
}

const fn default_refresh_requests() -> u32 {
    2
}

const fn default_flood_wait_retries() -> u32 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_api_id: None,
            telegram_api_hash: None,
            telegram_auth_method: default_auth_method(),
            telegram_bot_token: None,
            telegram_phone_number: None,
            telegram_channel_id: None,
            telegram_api_url: None,
            host: default_host(),
            port: default_port(),
            cache_dir: default_cache_dir(),
            cache_expiry_hours: default_cache_expiry_hours(),
            chunk_size: default_chunk_size(),
            temp_download_dir: default_temp_dir(),
            max_temp_file_age: default_max_temp_file_age(),
            rate_limit_enabled: true,
            max_requests_per_minute: default_max_requests(),
            stream_requests_per_minute: default_stream_requests(),
            refresh_requests_per_minute: default_refresh_requests(),
            flood_wait_max_retries: default_flood_wait_retries(),
            categories_str: None,
        }
    }
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a present config file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        // `APP__PORT=8080` sets `port`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Bare variables: `TELEGRAM_BOT_TOKEN` -> `telegram_bot_token`
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Parsed auth mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigIssue::InvalidAuthMethod`] for anything but `bot`/`user`.
    pub fn auth_mode(&self) -> Result<AuthMode, ConfigIssue> {
        self.telegram_auth_method.parse()
    }

    /// Parsed channel reference.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigIssue::MissingChannel`] or [`ConfigIssue::InvalidChannel`].
    pub fn channel(&self) -> Result<ChannelRef, ConfigIssue> {
        provided(self.telegram_channel_id.as_deref(), PLACEHOLDER_CHANNEL)
            .ok_or(ConfigIssue::MissingChannel)?
            .parse()
    }

    /// Credentials for the configured auth mode.
    ///
    /// # Errors
    ///
    /// Returns the first missing value for the selected mode.
    pub fn credentials(&self) -> Result<Credentials, ConfigIssue> {
        match self.auth_mode()? {
            AuthMode::Bot => {
                let token = provided(self.telegram_bot_token.as_deref(), PLACEHOLDER_BOT_TOKEN)
                    .ok_or(ConfigIssue::MissingBotToken)?;
                Ok(Credentials::Bot {
                    token: token.to_string(),
                })
            }
            AuthMode::User => {
                let api_id = provided(self.telegram_api_id.as_deref(), PLACEHOLDER_API_ID)
                    .ok_or(ConfigIssue::MissingApiId)?;
                let api_hash = provided(self.telegram_api_hash.as_deref(), PLACEHOLDER_API_HASH)
                    .ok_or(ConfigIssue::MissingApiHash)?;
                let phone_number =
                    provided(self.telegram_phone_number.as_deref(), PLACEHOLDER_PHONE)
                        .ok_or(ConfigIssue::MissingPhoneNumber)?;
                Ok(Credentials::User {
                    api_id: api_id.to_string(),
                    api_hash: api_hash.to_string(),
                    phone_number: phone_number.to_string(),
                })
            }
        }
    }

    /// Every configuration problem, in a stable order.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        match self.auth_mode() {
            Ok(AuthMode::Bot) => {
                if provided(self.telegram_bot_token.as_deref(), PLACEHOLDER_BOT_TOKEN).is_none() {
                    issues.push(ConfigIssue::MissingBotToken);
                }
            }
            Ok(AuthMode::User) => {
                if provided(self.telegram_api_id.as_deref(), PLACEHOLDER_API_ID).is_none() {
                    issues.push(ConfigIssue::MissingApiId);
                }
                if provided(self.telegram_api_hash.as_deref(), PLACEHOLDER_API_HASH).is_none() {
                    issues.push(ConfigIssue::MissingApiHash);
                }
                if provided(self.telegram_phone_number.as_deref(), PLACEHOLDER_PHONE).is_none() {
                    issues.push(ConfigIssue::MissingPhoneNumber);
                }
            }
            Err(issue) => issues.push(issue),
        }

        if let Err(issue) = self.channel() {
            issues.push(issue);
        }

        issues
    }

    /// Path of the catalog snapshot.
    #[must_use]
    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(MOVIES_CACHE_FILE)
    }

    /// Snapshot validity window.
    #[must_use]
    pub const fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_hours * 3600)
    }

    /// Temp file retention window.
    #[must_use]
    pub const fn temp_file_max_age(&self) -> Duration {
        Duration::from_secs(self.max_temp_file_age)
    }

    /// `host:port` to bind the HTTP server on.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Categories shown on the home page.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let parsed: Vec<String> = self
            .categories_str
            .as_ref()
            .map(|s| {
                s.split([',', ';'])
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if parsed.is_empty() {
            DEFAULT_CATEGORIES.iter().map(ToString::to_string).collect()
        } else {
            parsed
        }
    }
}

fn provided<'a>(value: Option<&'a str>, placeholder: &str) -> Option<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != placeholder)
}
