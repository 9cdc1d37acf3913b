pub mod chatbot;
pub mod config;
pub mod telegram_log;
