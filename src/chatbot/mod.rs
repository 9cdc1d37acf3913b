//! Chatbot module - answers Telegram messages with an OpenAI-compatible model,
//! keeping per-chat history inside a token budget.

pub mod commands;
pub mod database;
pub mod engine;
pub mod history;
pub mod images;
pub mod message;
pub mod openai;
pub mod response;
pub mod settings;
pub mod telegram;
pub mod tokens;
pub mod turn;

#[cfg(test)]
mod tests;

pub use database::{ChatSettings, Database};
pub use engine::{CallbackPress, ChatbotConfig, ChatbotEngine, EngineError, Reply, system_prompt};
pub use history::{HistoryManager, TokenBudget};
pub use message::{IncomingMessage, Media, ReplyTo};
pub use openai::{ChatModel, OpenAiClient};
pub use telegram::TelegramClient;
pub use turn::{ConversationTurn, Part, Role};
