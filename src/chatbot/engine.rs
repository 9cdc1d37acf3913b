//! Chatbot engine - turns incoming messages into replies.
//!
//! The engine owns no Telegram handle: it decides what to answer and leaves
//! the sending to the caller. Storage, the history manager and the model
//! client are injected at construction.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chatbot::commands::{Command, parse_command};
use crate::chatbot::database::{ChatSettings, Database, StoreError};
use crate::chatbot::history::HistoryManager;
use crate::chatbot::message::{IncomingMessage, voice_prompt};
use crate::chatbot::openai::{ChatModel, ChatRequest, ModelError};
use crate::chatbot::response::parse_response;
use crate::chatbot::settings::{self, Menu};
use crate::chatbot::turn::{ConversationTurn, Role};

const DEFAULT_CONTEXT: &str = "You are an helpful assistant.";
/// Telegram voice notes are always OGG/Opus.
const VOICE_FILE_NAME: &str = "voice.ogg";

const NOT_ALLOWED: &str =
    "Hi! Looks like I'm not allowed to work in this chat. Please, contact my owner to enable me.";
const NOT_PERMITTED: &str = "You are not allowed to use this command.";
const BLOCKED: &str = "You have been blocked from using this bot.";
const FLAGGED: &str = "Your message is inappropriate. You have been added to the deny list and will not be able to use this bot anymore.";
const WELCOME: &str = "Welcome! Set the context for the bot using the /context command to get started.";
const HISTORY_DISABLED: &str = "History is disabled for this chat.";

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    pub bot_username: String,
    pub allowed_chat_ids: HashSet<i64>,
    pub bot_admins: HashSet<i64>,
    pub max_output_tokens: u32,
    pub moderation: bool,
}

/// Something to send back to the chat, always as a reply to the triggering
/// message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    /// Model answer in Telegram HTML, with optional follow-up keyboard.
    Answer { html: String, followup: Vec<String> },
    Document { file_name: String, bytes: Vec<u8>, caption: String },
    Menu(Menu),
}

impl Reply {
    fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

/// A press on a settings button.
#[derive(Debug, Clone)]
pub struct CallbackPress {
    pub chat_id: i64,
    pub from_user_id: i64,
    /// Who sent the `/settings` command the menu answers.
    pub requested_by: Option<i64>,
    pub data: String,
    /// Text currently shown in the menu message, without formatting.
    pub current_text: String,
}

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    Model(ModelError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Model(e) => write!(f, "model request failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Model(e) => Some(e),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        Self::Model(e)
    }
}

/// Main chatbot engine.
pub struct ChatbotEngine<M> {
    config: ChatbotConfig,
    database: Arc<Database>,
    history: HistoryManager,
    model: M,
}

impl<M: ChatModel> ChatbotEngine<M> {
    pub fn new(config: ChatbotConfig, database: Arc<Database>, history: HistoryManager, model: M) -> Self {
        Self {
            config,
            database,
            history,
            model,
        }
    }

    pub fn config(&self) -> &ChatbotConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn is_admin(&self, user_id: i64) -> bool {
        self.config.bot_admins.contains(&user_id)
    }

    /// Handle a message. `Ok(None)` means the message is ignored.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> Result<Option<Reply>, EngineError> {
        if !self.config.allowed_chat_ids.contains(&msg.chat_id) {
            warn!("Message from unallowed chat {}, sending greeting", msg.chat_id);
            return Ok(Some(Reply::text(NOT_ALLOWED)));
        }

        if !msg.has_content() && !msg.is_reply_to_bot() {
            return Ok(None);
        }

        let command = parse_command(&msg.text, &self.config.bot_username);
        let is_admin = self.is_admin(msg.user_id);

        let blocked = !is_admin && self.database.is_denied(msg.user_id)?;

        match command {
            // Admins can always manage the deny list, even when on it themselves.
            Some(command @ (Command::Block(_) | Command::Unblock(_))) => {
                return self.run_command(msg, command).await;
            }
            Some(_) if blocked => return Ok(Some(self.answer_blocked(msg))),
            Some(command) => return self.run_command(msg, command).await,
            None => {}
        }

        if !msg.is_private && !msg.is_reply_to_bot() {
            return Ok(None);
        }

        if blocked {
            return Ok(Some(self.answer_blocked(msg)));
        }

        self.chat(msg, None).await
    }

    fn answer_blocked(&self, msg: &IncomingMessage) -> Reply {
        warn!("User {} is on the deny list, answering with block message", msg.user_id);
        Reply::text(BLOCKED)
    }

    fn block(&self, msg: &IncomingMessage, ids: &[i64], deny: bool) -> Result<Reply, EngineError> {
        if !self.is_admin(msg.user_id) {
            return Ok(Reply::text(NOT_PERMITTED));
        }
        let noun = if ids.len() > 1 { "Users" } else { "User" };
        if deny {
            self.database.deny(ids)?;
            Ok(Reply::text(format!("{noun} added to deny list.")))
        } else {
            self.database.allow(ids)?;
            Ok(Reply::text(format!("{noun} removed from deny list.")))
        }
    }

    async fn run_command(&self, msg: &IncomingMessage, command: Command) -> Result<Option<Reply>, EngineError> {
        let chat_id = msg.chat_id;
        let reply = match command {
            Command::Chat(prompt) => return self.chat(msg, Some(&prompt)).await,
            Command::Block(ids) => self.block(msg, &ids, true)?,
            Command::Unblock(ids) => self.block(msg, &ids, false)?,
            Command::Start => Reply::text(WELCOME),
            Command::Settings => Reply::Menu(settings::root()),
            Command::Context(Some(context)) => {
                info!("Setting context for chat {} to {:?}", chat_id, context);
                let reply = Reply::text(format!("Context set to \"{context}\""));
                self.database
                    .update_chat_settings(chat_id, |s| s.context = Some(context))?;
                reply
            }
            Command::Context(None) => Reply::text(match self.database.chat_settings(chat_id)?.context {
                Some(context) => format!("Current context is \"{context}\""),
                None => "No context currently set. Set the context for the bot using the /context command.".to_string(),
            }),
            Command::EnableHistory => self.set_history_enabled(chat_id, true)?,
            Command::DisableHistory => self.set_history_enabled(chat_id, false)?,
            Command::ClearHistory => self.clear_history(chat_id)?,
            Command::ExportHistory => self.export_history(chat_id)?,
            Command::ImportHistory => self.import_history(msg)?,
        };
        Ok(Some(reply))
    }

    fn set_history_enabled(&self, chat_id: i64, enabled: bool) -> Result<Reply, EngineError> {
        let state = if enabled { "enabled" } else { "disabled" };
        if self.database.chat_settings(chat_id)?.history_enabled == enabled {
            return Ok(Reply::text(format!("History already {state} for this chat.")));
        }
        info!("History {} for chat {}", state, chat_id);
        self.database.update_chat_settings(chat_id, |s| {
            s.history_enabled = enabled;
            // Turning history off also forgets it.
            if !enabled {
                s.history.clear();
            }
        })?;
        Ok(Reply::text(format!("History {state}.")))
    }

    fn clear_history(&self, chat_id: i64) -> Result<Reply, EngineError> {
        if !self.database.chat_settings(chat_id)?.history_enabled {
            return Ok(Reply::text(HISTORY_DISABLED));
        }
        info!("Clearing history for chat {}", chat_id);
        self.database.update_chat_settings(chat_id, |s| s.history.clear())?;
        Ok(Reply::text("History cleared."))
    }

    fn export_history(&self, chat_id: i64) -> Result<Reply, EngineError> {
        let settings = self.database.chat_settings(chat_id)?;
        if !settings.history_enabled {
            return Ok(Reply::text(HISTORY_DISABLED));
        }
        info!("Exporting history for chat {} ({} turns)", chat_id, settings.history.len());
        let bytes = serde_json::to_vec_pretty(&settings.history).map_err(StoreError::Serde)?;
        Ok(Reply::Document {
            file_name: "history.json".to_string(),
            bytes,
            caption: "Here is the current history for this chat.".to_string(),
        })
    }

    fn import_history(&self, msg: &IncomingMessage) -> Result<Reply, EngineError> {
        let Some(document) = &msg.document else {
            return Ok(Reply::text(
                "No history provided. Please attach the history to the message or reply to a message containing the history.",
            ));
        };

        let settings = self.database.chat_settings(msg.chat_id)?;
        if !settings.history_enabled {
            return Ok(Reply::text(HISTORY_DISABLED));
        }

        let Some(imported) = parse_history(document) else {
            warn!("Failed to import history for chat {}", msg.chat_id);
            return Ok(Reply::text(
                "Failed to import history. Please make sure the history is valid.",
            ));
        };

        let context = system_prompt(&settings);
        let trimmed = self.history.update_history(&context, &imported, &[]);
        info!(
            "Importing history for chat {} ({} turns, {} kept)",
            msg.chat_id,
            imported.len(),
            trimmed.len()
        );
        self.database.update_chat_settings(msg.chat_id, |s| s.history = trimmed)?;
        Ok(Reply::text("History imported."))
    }

    async fn chat(&self, msg: &IncomingMessage, prompt: Option<&str>) -> Result<Option<Reply>, EngineError> {
        let quotes_other = msg
            .reply_to
            .as_ref()
            .is_some_and(|r| !r.from_bot_itself && !r.text.is_empty());
        let caption = prompt.unwrap_or(&msg.text).trim();
        if caption.is_empty() && msg.images.is_empty() && msg.voice.is_none() && !quotes_other {
            return Ok(None);
        }

        let transcribed;
        let text = match &msg.voice {
            Some(voice) => {
                let transcription = self.model.transcribe(voice.bytes.clone(), VOICE_FILE_NAME).await?;
                debug!("Transcribed voice message {}: {} chars", msg.message_id, transcription.len());
                transcribed = voice_prompt(&transcription, caption);
                transcribed.as_str()
            }
            None => caption,
        };

        if self.config.moderation && !text.is_empty() {
            match self.model.moderate(text).await {
                Ok(true) => {
                    info!("Message from user {} in chat {} was flagged", msg.user_id, msg.chat_id);
                    self.database.deny(&[msg.user_id])?;
                    return Ok(Some(Reply::text(FLAGGED)));
                }
                Ok(false) => {}
                Err(e) => warn!("Moderation failed, letting message through: {e}"),
            }
        }

        let settings = self.database.chat_settings(msg.chat_id)?;
        let context = system_prompt(&settings);
        let stored: &[ConversationTurn] = if settings.history_enabled { &settings.history } else { &[] };

        let history = self
            .history
            .update_history(&context, stored, &[msg.to_user_turn(Some(text))]);

        let mut turns = Vec::with_capacity(history.len() + 1);
        turns.push(ConversationTurn::system(context.as_str()));
        turns.extend(history.iter().cloned());

        let raw = self
            .model
            .complete(ChatRequest {
                turns,
                max_output_tokens: self.config.max_output_tokens,
                user: Some(msg.user_id.to_string()),
            })
            .await?;

        let response = parse_response(&raw);

        if settings.history_enabled {
            let updated = self
                .history
                .update_history(&context, &history, &[ConversationTurn::assistant(raw)]);
            self.database
                .update_chat_settings(msg.chat_id, |s| s.history = updated)?;
        }

        let followup = if settings.history_enabled {
            response
                .followup
                .iter()
                .map(|hint| self.followup_button(msg, hint))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Some(Reply::Answer {
            html: response.message,
            followup,
        }))
    }

    /// In groups the bot only sees messages addressed to it, so hints are
    /// turned into `/chat@bot` commands.
    fn followup_button(&self, msg: &IncomingMessage, hint: &str) -> String {
        if msg.is_private {
            hint.to_string()
        } else {
            format!("/chat@{} {}", self.config.bot_username, hint)
        }
    }

    /// Handle a settings button press. `Ok(None)` means nothing to edit.
    pub fn handle_callback(&self, press: &CallbackPress) -> Result<Option<Menu>, EngineError> {
        if press.requested_by != Some(press.from_user_id) {
            info!(
                "Ignoring settings press from {} on a menu requested by {:?}",
                press.from_user_id, press.requested_by
            );
            return Ok(None);
        }

        let current = self.database.chat_settings(press.chat_id)?;
        let Some(update) = settings::press(&press.data, &current) else {
            warn!("Unknown settings callback {:?}", press.data);
            return Ok(None);
        };

        if let Some(new_settings) = &update.settings {
            self.database.save_chat_settings(press.chat_id, new_settings)?;
        }

        if update.menu.plain_text() == press.current_text {
            return Ok(None);
        }
        Ok(Some(update.menu))
    }
}

/// Parse an uploaded history. Only user and assistant turns are accepted.
fn parse_history(bytes: &[u8]) -> Option<Vec<ConversationTurn>> {
    let turns: Vec<ConversationTurn> = serde_json::from_slice(bytes).ok()?;
    turns
        .iter()
        .all(|t| matches!(t.role, Role::User | Role::Assistant))
        .then_some(turns)
}

/// System prompt sent before the history.
pub fn system_prompt(settings: &ChatSettings) -> String {
    let followup = if settings.history_enabled {
        "\nIf the response might have one or more followup questions/messages by the user, provide them in a \"followup\" property, which must be an array of strings containing up to 3 followup questions/messages.\n"
    } else {
        ""
    };
    let context = settings
        .context
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(DEFAULT_CONTEXT);

    format!(
        r#"You are a bot that behaves according to a user-provided context.
Since your responses will need to be parsed programmatically, you MUST ALWAYS respond with a valid JSON.
The JSON MUST be provided as-is, without being wrapped in a Markdown code block nor anything else, and it MUST be minified.
The response JSON MUST HAVE a "message" property containing the answer to be sent to the user, based on the context you were provided with.
The "message" property MUST BE written in Telegram's "HTML" format, so you can use the following HTML tags:
- <b>bold</b>
- <i>italic</i>
- <u>underline</u>
- <s>strikethrough</s>
- <tg-spoiler>spoiler</tg-spoiler>
- <a href="http://example.com">URL</a>
- <code>inline fixed-width code</code>
- <pre>pre-formatted fixed-width code block</pre>
- <blockquote>Block quotation</blockquote>
You MUST NOT use any other HTML tags.
Reserved HTML entities in the message MUST BE escaped.
Each user message is a JSON object with the sender in "from", the text in "message" and, when the user is replying to someone else, the quoted message in "replyTo".
{followup}
The context is the one provided below in triple quotes:
"""{context}""""#
    )
}
