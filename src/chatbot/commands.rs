//! Slash-command parsing.
//!
//! Commands look like `/name`, `/name@bot_username` or `/name args...`. In
//! groups Telegram appends the bot's username; a command addressed to a
//! different bot is treated as plain text.

use regex::Regex;
use std::sync::LazyLock;

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/([A-Za-z0-9_]+)(?:@([A-Za-z0-9_]+))?(?:\s+(.*))?$").expect("valid command regex")
});

/// Commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Settings,
    /// `/context` with optional new context.
    Context(Option<String>),
    EnableHistory,
    DisableHistory,
    ClearHistory,
    ExportHistory,
    ImportHistory,
    Block(Vec<i64>),
    Unblock(Vec<i64>),
    /// `/chat prompt`: talk to the bot in a group without replying to it.
    Chat(String),
}

/// Parse `text` as a command for `bot_username`. Returns `None` for plain
/// text, unknown commands, and commands addressed to another bot.
pub fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let caps = COMMAND_RE.captures(text.trim())?;
    let name = caps.get(1)?.as_str().to_lowercase();

    if let Some(target) = caps.get(2)
        && !target.as_str().eq_ignore_ascii_case(bot_username)
    {
        return None;
    }

    let args = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");

    let command = match name.as_str() {
        "start" => Command::Start,
        "settings" => Command::Settings,
        "context" => Command::Context((!args.is_empty()).then(|| args.to_string())),
        "enablehistory" => Command::EnableHistory,
        "disablehistory" => Command::DisableHistory,
        "clearhistory" => Command::ClearHistory,
        "exporthistory" => Command::ExportHistory,
        "importhistory" => Command::ImportHistory,
        "block" => Command::Block(parse_ids(args)),
        "unblock" => Command::Unblock(parse_ids(args)),
        "chat" => Command::Chat(args.to_string()),
        _ => return None,
    };
    Some(command)
}

/// Parse user IDs separated by whitespace or commas, skipping anything that
/// isn't an integer.
pub fn parse_ids(args: &str) -> Vec<i64> {
    args.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}
