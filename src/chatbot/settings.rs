//! Inline-keyboard settings menu.
//!
//! Every button carries a callback id. View ids (`settings`, `history`) just
//! render a page; action ids (`history:toggle`, `history:clear`) change the
//! chat settings and then render the page they belong to.

use crate::chatbot::database::ChatSettings;

pub const ROOT: &str = "settings";
const HISTORY: &str = "history";
const HISTORY_TOGGLE: &str = "history:toggle";
const HISTORY_CLEAR: &str = "history:clear";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    pub callback: String,
}

impl MenuButton {
    fn new(label: &str, callback: &str) -> Self {
        Self {
            label: label.to_string(),
            callback: callback.to_string(),
        }
    }
}

/// One rendered page of the menu (HTML text plus button rows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub text: String,
    pub buttons: Vec<Vec<MenuButton>>,
}

impl Menu {
    /// Text with HTML tags removed, as Telegram reports it back.
    pub fn plain_text(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut in_tag = false;
        for c in self.text.chars() {
            match c {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                _ if !in_tag => out.push(c),
                _ => {}
            }
        }
        out
    }
}

/// Result of pressing a button.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuUpdate {
    /// New settings to persist, if the button changed anything.
    pub settings: Option<ChatSettings>,
    pub menu: Menu,
}

/// Apply the callback `data` to `current`. Unknown ids return `None`.
pub fn press(data: &str, current: &ChatSettings) -> Option<MenuUpdate> {
    let (view, settings) = match data {
        HISTORY_TOGGLE => {
            let mut next = current.clone();
            next.history_enabled = !current.history_enabled;
            if current.history_enabled {
                next.history.clear();
            }
            (HISTORY, Some(next))
        }
        HISTORY_CLEAR => {
            let mut next = current.clone();
            next.history.clear();
            (HISTORY, Some(next))
        }
        other => (other, None),
    };

    let menu = render(view, settings.as_ref().unwrap_or(current))?;
    Some(MenuUpdate { settings, menu })
}

/// The page `/settings` opens on.
pub fn root() -> Menu {
    Menu {
        text: "Bot settings".to_string(),
        buttons: vec![vec![MenuButton::new("History", HISTORY)]],
    }
}

/// Render the page `view` for `settings`.
pub fn render(view: &str, settings: &ChatSettings) -> Option<Menu> {
    match view {
        ROOT => Some(root()),
        HISTORY => {
            let text = if settings.history_enabled {
                format!(
                    "History is currently <b>enabled</b> and contains <b>{}</b> messages.",
                    settings.history.len()
                )
            } else {
                "History is currently <b>disabled</b>.".to_string()
            };

            let mut actions = vec![MenuButton::new(
                if settings.history_enabled { "Disable" } else { "Enable" },
                HISTORY_TOGGLE,
            )];
            if !settings.history.is_empty() {
                actions.push(MenuButton::new("Clear", HISTORY_CLEAR));
            }

            Some(Menu {
                text,
                buttons: vec![actions, vec![MenuButton::new("⬅️ Back", ROOT)]],
            })
        }
        _ => None,
    }
}
