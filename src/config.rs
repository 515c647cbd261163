//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the validation bounds used by the dialogs.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Application settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(default)]
    pub telegram_token: String,

    /// Path of the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Directory where uploaded documents are stored
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Base URL of the model-serving facade (intent, sentiment, questions, deadlines)
    pub inference_url: Option<String>,
    /// Bearer token for the model-serving facade
    pub inference_api_key: Option<String>,
    /// Request timeout for the model-serving facade
    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,

    /// OpenAI-compatible API base for open chat
    pub chat_api_base: Option<String>,
    /// API key for open chat
    pub chat_api_key: Option<String>,
    /// Model used for open chat
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// System message for open chat
    pub system_message: Option<String>,

    /// TTL of the platform identity -> account cache
    #[serde(default = "default_identity_cache_ttl_secs")]
    pub identity_cache_ttl_secs: u64,
    /// Maximum number of cached identities
    #[serde(default = "default_identity_cache_max_size")]
    pub identity_cache_max_size: u64,

    /// Username of an administrator account created on startup if missing
    pub bootstrap_admin_username: Option<String>,
    /// Password of the bootstrap administrator
    pub bootstrap_admin_password: Option<String>,
}

fn default_database_path() -> String {
    "assistant.db".to_string()
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

const fn default_inference_timeout_secs() -> u64 {
    30
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_identity_cache_ttl_secs() -> u64 {
    600
}

const fn default_identity_cache_max_size() -> u64 {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            database_path: default_database_path(),
            upload_dir: default_upload_dir(),
            inference_url: None,
            inference_api_key: None,
            inference_timeout_secs: default_inference_timeout_secs(),
            chat_api_base: None,
            chat_api_key: None,
            chat_model: default_chat_model(),
            system_message: None,
            identity_cache_ttl_secs: default_identity_cache_ttl_secs(),
            identity_cache_max_size: default_identity_cache_max_size(),
            bootstrap_admin_username: None,
            bootstrap_admin_password: None,
        }
    }
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vitte_assistant::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__DATABASE_PATH=/var/lib/assistant.db` sets `database_path`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        if settings.telegram_token.is_empty() {
            if let Ok(val) = std::env::var("TELEGRAM_TOKEN") {
                if !val.is_empty() {
                    settings.telegram_token = val;
                }
            }
        }

        Ok(settings)
    }

    /// Secrets that must never reach the logs
    #[must_use]
    pub fn secrets(&self) -> Vec<String> {
        [
            Some(&self.telegram_token),
            self.inference_api_key.as_ref(),
            self.chat_api_key.as_ref(),
            self.bootstrap_admin_password.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect()
    }
}

// Telegram API retry policy
/// Maximum retries for Telegram API operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single Telegram API backoff
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Telegram message length limit with some headroom
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

// Dialog validation bounds
/// Minimum password length
pub const MIN_SECRET_LEN: usize = 8;
/// Maximum login length
pub const MAX_USERNAME_LEN: usize = 255;
/// Accepted summary lengths in sentences
pub const SUMMARY_LENGTH_RANGE: RangeInclusive<u32> = 1..=20;
/// Accepted work interval lengths in minutes
pub const WORK_MINUTES_RANGE: RangeInclusive<u32> = 1..=180;
/// Accepted break lengths in minutes
pub const BREAK_MINUTES_RANGE: RangeInclusive<u32> = 1..=60;

// Per-account defaults
/// Default interface language
pub const DEFAULT_LANGUAGE: &str = "ru";
/// Default summary length in sentences
pub const DEFAULT_SUMMARY_LENGTH: u32 = 3;
/// Default work interval in minutes
pub const DEFAULT_WORK_MINUTES: u32 = 25;
/// Default break in minutes
pub const DEFAULT_BREAK_MINUTES: u32 = 5;

// Reports
/// Number of recent requests shown in personal stats
pub const RECENT_REQUESTS_LIMIT: usize = 5;
/// Number of handlers in each global ranking
pub const TOP_HANDLERS_LIMIT: usize = 5;
/// Number of topics shown per document
pub const TOP_TOPICS_PER_DOCUMENT: usize = 3;
