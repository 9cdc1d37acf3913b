//! Conversation turns fed to the language model.
//!
//! A turn's content is always a list of [`Part`]s. Vendor payloads that carry
//! a bare string as content (the shape of exported/imported histories) are
//! normalized into a single text part on deserialization.

use serde::{Deserialize, Deserializer, Serialize};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[serde(alias = "model")]
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Resolution hint attached to media parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    #[default]
    Low,
    High,
    Auto,
}

impl Detail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Detail::Low => "low",
            Detail::High => "high",
            Detail::Auto => "auto",
        }
    }
}

/// One piece of a turn's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        value: String,
    },
    Media {
        /// Data URI or remote URL.
        url: String,
        content_type: String,
        #[serde(default)]
        detail: Detail,
    },
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Part::Text { value: value.into() }
    }

    /// Low-detail media part holding `bytes` inline as a base64 data URI.
    pub fn inline_media(bytes: &[u8], content_type: &str) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Part::Media {
            url: format!("data:{content_type};base64,{encoded}"),
            content_type: content_type.to_string(),
            detail: Detail::Low,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { value } => Some(value),
            Part::Media { .. } => None,
        }
    }
}

/// A single message-equivalent unit of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<Part>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: Vec<Part>) -> Self {
        Self { role, content }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(content: Vec<Part>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Concatenated text parts, media skipped.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn media_count(&self) -> usize {
        self.content
            .iter()
            .filter(|p| matches!(p, Part::Media { .. }))
            .count()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentRepr {
    Plain(String),
    Parts(Vec<Part>),
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<Part>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match ContentRepr::deserialize(deserializer)? {
        ContentRepr::Plain(text) => vec![Part::Text { value: text }],
        ContentRepr::Parts(parts) => parts,
    })
}
