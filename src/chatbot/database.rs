//! Persistent SQLite storage for per-chat settings and the deny list.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::chatbot::turn::ConversationTurn;

/// Errors from the storage layer.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "database error: {e}"),
            Self::Serde(e) => write!(f, "stored history is not valid JSON: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Serde(e) => Some(e),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

/// Settings the users of a chat can change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSettings {
    /// User-provided personality for the bot.
    pub context: Option<String>,
    pub history_enabled: bool,
    /// Stored turns, oldest first. Only kept while history is enabled.
    pub history: Vec<ConversationTurn>,
}

/// SQLite database shared by all handlers.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Self::from_connection(Connection::open(path)?)?;
        let (chats, denied) = db.counts()?;
        info!("Loaded database from {:?} ({} chats, {} denied users)", path, chats, denied);
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                chat_id INTEGER PRIMARY KEY,
                context TEXT,
                history_enabled INTEGER NOT NULL DEFAULT 0,
                history TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deny_list (
                user_id INTEGER PRIMARY KEY,
                added_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn counts(&self) -> Result<(i64, i64), StoreError> {
        let conn = self.lock();
        let chats = conn.query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        let denied = conn.query_row("SELECT COUNT(*) FROM deny_list", [], |row| row.get(0))?;
        Ok((chats, denied))
    }

    // ==================== CHAT SETTINGS ====================

    /// Settings for `chat_id`, defaults if the chat was never configured.
    pub fn chat_settings(&self, chat_id: i64) -> Result<ChatSettings, StoreError> {
        let conn = self.lock();
        let row: Option<(Option<String>, bool, String)> = conn
            .query_row(
                "SELECT context, history_enabled, history FROM chats WHERE chat_id = ?1",
                params![chat_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((context, history_enabled, history)) = row else {
            return Ok(ChatSettings::default());
        };

        Ok(ChatSettings {
            context,
            history_enabled,
            history: serde_json::from_str(&history)?,
        })
    }

    pub fn save_chat_settings(&self, chat_id: i64, settings: &ChatSettings) -> Result<(), StoreError> {
        let history = serde_json::to_string(&settings.history)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO chats (chat_id, context, history_enabled, history, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chat_id) DO UPDATE SET
                context = ?2,
                history_enabled = ?3,
                history = ?4,
                updated_at = ?5",
            params![chat_id, settings.context, settings.history_enabled, history, now],
        )?;
        debug!(
            "Saved settings for chat {} ({} history turns)",
            chat_id,
            settings.history.len()
        );
        Ok(())
    }

    /// Load, modify and store the settings of one chat.
    pub fn update_chat_settings<F>(&self, chat_id: i64, f: F) -> Result<ChatSettings, StoreError>
    where
        F: FnOnce(&mut ChatSettings),
    {
        let mut settings = self.chat_settings(chat_id)?;
        f(&mut settings);
        self.save_chat_settings(chat_id, &settings)?;
        Ok(settings)
    }

    // ==================== DENY LIST ====================

    pub fn deny_list(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT user_id FROM deny_list ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn is_denied(&self, user_id: i64) -> Result<bool, StoreError> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT user_id FROM deny_list WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Add users to the deny list. Returns how many were not already there.
    pub fn deny(&self, user_ids: &[i64]) -> Result<usize, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.lock();
        let mut added = 0;
        for id in user_ids {
            added += conn.execute(
                "INSERT OR IGNORE INTO deny_list (user_id, added_at) VALUES (?1, ?2)",
                params![id, now],
            )?;
        }
        if added > 0 {
            info!("Added {} user(s) to the deny list", added);
        }
        Ok(added)
    }

    /// Remove users from the deny list. Returns how many were removed.
    pub fn allow(&self, user_ids: &[i64]) -> Result<usize, StoreError> {
        let conn = self.lock();
        let mut removed = 0;
        for id in user_ids {
            removed += conn.execute("DELETE FROM deny_list WHERE user_id = ?1", params![id])?;
        }
        if removed > 0 {
            info!("Removed {} user(s) from the deny list", removed);
        }
        Ok(removed)
    }
}
