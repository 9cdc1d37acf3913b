//! Incoming Telegram messages, reduced to what the engine needs.

use serde::Serialize;

use crate::chatbot::turn::{ConversationTurn, Part};

/// The message being replied to.
#[derive(Debug, Clone, Default)]
pub struct ReplyTo {
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub text: String,
    pub from_bot_itself: bool,
}

/// Downloaded media attached to a message.
#[derive(Debug, Clone)]
pub struct Media {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A message with everything the engine needs already downloaded.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub is_private: bool,
    /// Text or caption.
    pub text: String,
    pub reply_to: Option<ReplyTo>,
    pub images: Vec<Media>,
    /// Voice note, transcribed before the model sees the message.
    pub voice: Option<Media>,
    /// Raw bytes of an attached document (used by `/importhistory`).
    pub document: Option<Vec<u8>>,
}

/// Max chars to include from a quoted reply.
const MAX_QUOTE_LENGTH: usize = 1000;

/// JSON input the model sees for a user turn.
#[derive(Serialize)]
struct ModelInput<'a> {
    #[serde(rename = "from")]
    username: &'a str,
    message: &'a str,
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    reply_to: Option<QuotedInput<'a>>,
}

#[derive(Serialize)]
struct QuotedInput<'a> {
    #[serde(rename = "from", skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    message: String,
}

impl IncomingMessage {
    pub fn is_reply_to_bot(&self) -> bool {
        self.reply_to.as_ref().is_some_and(|r| r.from_bot_itself)
    }

    /// Whether there is anything for the model to look at.
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || !self.images.is_empty() || self.voice.is_some()
    }

    /// Build the user turn: a JSON text part describing the message followed
    /// by the attached images as inline media.
    ///
    /// `prompt` overrides the message text (used for `/chat prompt`). Quotes
    /// of the bot's own messages are left out, those are already in history.
    pub fn to_user_turn(&self, prompt: Option<&str>) -> ConversationTurn {
        let reply_to = self
            .reply_to
            .as_ref()
            .filter(|r| !r.from_bot_itself && !r.text.is_empty())
            .map(|r| QuotedInput {
                username: r.username.as_deref(),
                message: r.text.chars().take(MAX_QUOTE_LENGTH).collect(),
            });

        let input = ModelInput {
            username: &self.username,
            message: prompt.unwrap_or(&self.text).trim(),
            reply_to,
        };

        // Serializing plain string fields cannot fail.
        let text = serde_json::to_string(&input).unwrap_or_default();

        let mut parts = vec![Part::text(text)];
        parts.extend(
            self.images
                .iter()
                .map(|m| Part::inline_media(&m.bytes, &m.content_type)),
        );
        ConversationTurn::user(parts)
    }
}

/// Message text for a transcribed voice note, with the caption (if any)
/// kept as a separate prompt.
pub fn voice_prompt(transcription: &str, caption: &str) -> String {
    let mut text = format!(
        "The user sent an audio. The transcription is provided here in triple quotes: \"\"\"{transcription}\"\"\""
    );
    if !caption.trim().is_empty() {
        text.push_str(&format!(
            "\nThe user also provided the following prompt together with the audio, \
             reported in the following triple quotes: \"\"\"{}\"\"\"",
            caption.trim()
        ));
    }
    text
}
