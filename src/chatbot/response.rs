//! Parsing of the model's JSON replies.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Models sometimes wrap the JSON in a Markdown code block despite being told
/// not to.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*?)\n?```$").expect("valid fence regex"));

/// Maximum number of follow-up suggestions shown as keyboard buttons.
pub const MAX_FOLLOWUPS: usize = 3;

/// What the model wants sent back to the chat.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct BotResponse {
    /// Telegram-HTML formatted answer.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub followup: Vec<String>,
}

/// Parse a raw completion. Anything that isn't the expected JSON object is
/// treated as the message itself.
pub fn parse_response(raw: &str) -> BotResponse {
    let trimmed = raw.trim();
    let body = FENCE_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    match serde_json::from_str::<BotResponse>(body) {
        Ok(mut parsed) if !parsed.message.trim().is_empty() => {
            parsed.followup.retain(|f| !f.trim().is_empty());
            parsed.followup.truncate(MAX_FOLLOWUPS);
            parsed
        }
        _ => BotResponse {
            message: trimmed.to_string(),
            followup: Vec::new(),
        },
    }
}
