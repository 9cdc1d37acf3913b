use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::ChatId;

use crate::chatbot::history::TokenBudget;
use crate::chatbot::openai::{DEFAULT_BASE_URL, DEFAULT_TRANSCRIPTION_MODEL};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    /// Any OpenAI-compatible endpoint.
    #[serde(default = "default_base_url")]
    openai_base_url: String,
    #[serde(default)]
    allowed_chat_ids: Vec<i64>,
    /// Users who can manage the deny list.
    #[serde(default)]
    bot_admins: Vec<u64>,
    #[serde(default = "default_model")]
    model: String,
    /// Context window of the model, in tokens.
    #[serde(default = "default_max_history_tokens")]
    max_history_tokens: usize,
    #[serde(default = "default_max_output_tokens")]
    max_output_tokens: u32,
    /// Speech-to-text model for voice messages.
    #[serde(default = "default_transcription_model")]
    transcription_model: String,
    #[serde(default = "default_moderation")]
    moderation: bool,
    /// Directory for state files (database, logs). Defaults to current directory.
    data_dir: Option<String>,
    log_chat_id: Option<i64>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_transcription_model() -> String {
    DEFAULT_TRANSCRIPTION_MODEL.to_string()
}

fn default_max_history_tokens() -> usize {
    128_000
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_moderation() -> bool {
    true
}

pub struct Config {
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub allowed_chat_ids: HashSet<i64>,
    pub bot_admins: HashSet<i64>,
    pub model: String,
    pub history_budget: TokenBudget,
    pub max_output_tokens: u32,
    pub transcription_model: String,
    pub moderation: bool,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.openai_api_key.trim().is_empty() {
            return Err(ConfigError::Validation("openai_api_key is required".into()));
        }
        if file.allowed_chat_ids.is_empty() {
            return Err(ConfigError::Validation(
                "allowed_chat_ids must contain at least one chat ID".into(),
            ));
        }
        if file.model.trim().is_empty() {
            return Err(ConfigError::Validation("model must not be empty".into()));
        }
        if file.transcription_model.trim().is_empty() {
            return Err(ConfigError::Validation("transcription_model must not be empty".into()));
        }
        if file.max_output_tokens == 0 {
            return Err(ConfigError::Validation("max_output_tokens must be greater than 0".into()));
        }
        let history_budget = TokenBudget::new(file.max_history_tokens)
            .ok_or_else(|| ConfigError::Validation("max_history_tokens must be greater than 0".into()))?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            openai_base_url: file.openai_base_url,
            allowed_chat_ids: file.allowed_chat_ids.into_iter().collect(),
            bot_admins: file.bot_admins.into_iter().map(|id| id as i64).collect(),
            model: file.model,
            history_budget,
            max_output_tokens: file.max_output_tokens,
            transcription_model: file.transcription_model,
            moderation: file.moderation,
            data_dir,
            log_chat_id: file.log_chat_id.map(ChatId),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("chattgb.db")
    }
}
