//! Telegram client using teloxide.

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup,
    KeyboardRemove, MessageId, ParseMode, ReplyMarkup, ReplyParameters,
};
use tracing::{info, warn};

use crate::chatbot::engine::Reply;
use crate::chatbot::settings::Menu;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

fn inline_keyboard(menu: &Menu) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(menu.buttons.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback.clone()))
            .collect::<Vec<_>>()
    }))
}

fn followup_keyboard(followup: &[String]) -> ReplyMarkup {
    if followup.is_empty() {
        return ReplyMarkup::KeyboardRemove(KeyboardRemove::new());
    }
    let mut keyboard = KeyboardMarkup::new(followup.iter().map(|hint| vec![KeyboardButton::new(hint.clone())]));
    keyboard.one_time_keyboard = true;
    keyboard.selective = true;
    ReplyMarkup::Keyboard(keyboard)
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn typing(&self, chat_id: i64) {
        if let Err(e) = self.bot.send_chat_action(ChatId(chat_id), ChatAction::Typing).await {
            warn!("Failed to send chat action: {e}");
        }
    }

    /// Send `reply` as a reply to `reply_to_message_id`.
    pub async fn send_reply(&self, chat_id: i64, reply_to_message_id: i64, reply: Reply) -> Result<i64, String> {
        let chat = ChatId(chat_id);
        let reply_params = ReplyParameters::new(MessageId(reply_to_message_id as i32));

        let sent = match reply {
            Reply::Text(text) => {
                self.bot
                    .send_message(chat, text)
                    .reply_parameters(reply_params)
                    .await
            }
            Reply::Answer { html, followup } => {
                self.bot
                    .send_message(chat, html)
                    .parse_mode(ParseMode::Html)
                    .reply_parameters(reply_params)
                    .reply_markup(followup_keyboard(&followup))
                    .await
            }
            Reply::Document { file_name, bytes, caption } => {
                info!("📎 Sending {} to chat {} ({} bytes)", file_name, chat_id, bytes.len());
                self.bot
                    .send_document(chat, InputFile::memory(bytes).file_name(file_name))
                    .caption(caption)
                    .reply_parameters(reply_params)
                    .await
            }
            Reply::Menu(menu) => {
                self.bot
                    .send_message(chat, menu.text.clone())
                    .parse_mode(ParseMode::Html)
                    .reply_parameters(reply_params)
                    .reply_markup(inline_keyboard(&menu))
                    .await
            }
        };

        sent.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Replace the text and buttons of a settings menu message.
    pub async fn edit_menu(&self, chat_id: i64, message_id: i64, menu: &Menu) -> Result<(), String> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), menu.text.clone())
            .parse_mode(ParseMode::Html)
            .reply_markup(inline_keyboard(menu))
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to edit menu: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Download a file by file_id.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded {} ({} bytes)", file.path, data.len());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::settings;

    #[test]
    fn test_inline_keyboard_rows() {
        let markup = inline_keyboard(&settings::root());
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "History");
    }

    #[test]
    fn test_followup_keyboard() {
        match followup_keyboard(&["one".to_string(), "two".to_string()]) {
            ReplyMarkup::Keyboard(kb) => {
                assert_eq!(kb.keyboard.len(), 2);
                assert_eq!(kb.keyboard[1][0].text, "two");
                assert!(kb.one_time_keyboard);
            }
            other => panic!("expected keyboard, got {other:?}"),
        }
        assert!(matches!(followup_keyboard(&[]), ReplyMarkup::KeyboardRemove(_)));
    }
}
