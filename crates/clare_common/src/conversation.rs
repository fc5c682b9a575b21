//! Conversation turn persistence and short-history retrieval.
//!
//! Turns are immutable once written, except for the feedback fields which
//! can be set exactly once. History lookups for unknown conversation ids
//! return empty, never an error.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::context::{ContextPayload, SourceRef};
use crate::entities::EntityBag;

/// How many past turns are replayed into the prompt.
pub const HISTORY_WINDOW: usize = 5;

/// One persisted user-message / assistant-response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub user_message: String,
    pub ai_response: String,
    pub context_used: ContextPayload,
    pub entities_extracted: EntityBag,
    pub intent: String,
    pub sub_intent: Option<String>,
    pub confidence: f32,
    pub tokens_used: u32,
    pub cost: f64,
    pub is_helpful: Option<bool>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields of a turn being appended; id, feedback and timestamp are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub user_message: String,
    pub ai_response: String,
    pub context_used: ContextPayload,
    pub entities_extracted: EntityBag,
    pub intent: String,
    pub sub_intent: Option<String>,
    pub confidence: f32,
    pub tokens_used: u32,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One side of a turn, as exposed by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
}

/// A past user/assistant pair replayed into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

pub trait ConversationStore: Send + Sync {
    /// Append a finished turn; returns its id.
    fn append(&self, turn: NewTurn) -> Result<i64>;
    /// The most recent `limit` exchanges, oldest first.
    fn recent_exchanges(&self, conversation_id: &str, limit: usize) -> Result<Vec<Exchange>>;
    /// Full alternating user/assistant history, oldest first.
    fn history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>>;
    /// Fetch one persisted turn by id.
    fn turn(&self, turn_id: i64) -> Result<Option<ConversationTurn>>;
    /// Delete all turns of a conversation; true if any existed.
    fn clear(&self, conversation_id: &str) -> Result<bool>;
    /// Set the feedback fields once; false if the turn is unknown or
    /// feedback was already recorded.
    fn set_feedback(&self, turn_id: i64, is_helpful: bool, feedback: Option<&str>)
        -> Result<bool>;
}

pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create conversation directory")?;
        }
        let conn = Connection::open(path).context("Failed to open conversation database")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversation_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                user_id TEXT,
                user_message TEXT NOT NULL,
                ai_response TEXT NOT NULL,
                context_used TEXT NOT NULL,
                entities_extracted TEXT NOT NULL,
                intent TEXT NOT NULL,
                sub_intent TEXT,
                confidence REAL NOT NULL,
                tokens_used INTEGER NOT NULL,
                cost REAL NOT NULL,
                is_helpful INTEGER,
                feedback TEXT,
                created_at DATETIME NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation
             ON conversation_turns(conversation_id, created_at)",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("conversation database mutex poisoned"))
    }
}

impl ConversationStore for SqliteConversationStore {
    fn append(&self, turn: NewTurn) -> Result<i64> {
        let context_json =
            serde_json::to_string(&turn.context_used).context("Failed to serialize context")?;
        let entities_json = serde_json::to_string(&turn.entities_extracted)
            .context("Failed to serialize entities")?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversation_turns
                (conversation_id, user_id, user_message, ai_response, context_used,
                 entities_extracted, intent, sub_intent, confidence, tokens_used,
                 cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                turn.conversation_id,
                turn.user_id,
                turn.user_message,
                turn.ai_response,
                context_json,
                entities_json,
                turn.intent,
                turn.sub_intent,
                turn.confidence,
                turn.tokens_used,
                turn.cost,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_exchanges(&self, conversation_id: &str, limit: usize) -> Result<Vec<Exchange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_message, ai_response FROM conversation_turns
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let mut exchanges = stmt
            .query_map(rusqlite::params![conversation_id, limit as i64], |row| {
                Ok(Exchange {
                    user: row.get(0)?,
                    assistant: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // Fetched newest-first; prompts want oldest-first.
        exchanges.reverse();
        Ok(exchanges)
    }

    fn history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_message, ai_response, context_used, created_at
             FROM conversation_turns
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut history = Vec::with_capacity(rows.len() * 2);
        for (user_message, ai_response, context_json, created_at) in rows {
            let sources = serde_json::from_str::<ContextPayload>(&context_json)
                .ok()
                .map(|c| c.sources)
                .filter(|s| !s.is_empty());
            history.push(HistoryEntry {
                role: Role::User,
                content: user_message,
                timestamp: created_at,
                sources: None,
            });
            history.push(HistoryEntry {
                role: Role::Assistant,
                content: ai_response,
                timestamp: created_at,
                sources,
            });
        }
        Ok(history)
    }

    fn turn(&self, turn_id: i64) -> Result<Option<ConversationTurn>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT id, conversation_id, user_id, user_message, ai_response,
                    context_used, entities_extracted, intent, sub_intent,
                    confidence, tokens_used, cost, is_helpful, feedback, created_at
             FROM conversation_turns WHERE id = ?1",
            [turn_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, f32>(9)?,
                    row.get::<_, u32>(10)?,
                    row.get::<_, f64>(11)?,
                    row.get::<_, Option<bool>>(12)?,
                    row.get::<_, Option<String>>(13)?,
                    row.get::<_, DateTime<Utc>>(14)?,
                ))
            },
        );
        let row = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (
            id,
            conversation_id,
            user_id,
            user_message,
            ai_response,
            context_json,
            entities_json,
            intent,
            sub_intent,
            confidence,
            tokens_used,
            cost,
            is_helpful,
            feedback,
            created_at,
        ) = row;
        Ok(Some(ConversationTurn {
            id,
            conversation_id,
            user_id,
            user_message,
            ai_response,
            // Corrupt blobs read as empty rather than failing the lookup.
            context_used: serde_json::from_str(&context_json).unwrap_or_default(),
            entities_extracted: serde_json::from_str(&entities_json).unwrap_or_default(),
            intent,
            sub_intent,
            confidence,
            tokens_used,
            cost,
            is_helpful,
            feedback,
            created_at,
        }))
    }

    fn clear(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM conversation_turns WHERE conversation_id = ?1",
            [conversation_id],
        )?;
        Ok(deleted > 0)
    }

    fn set_feedback(
        &self,
        turn_id: i64,
        is_helpful: bool,
        feedback: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        // The IS NULL guard makes feedback a write-once field.
        let updated = conn.execute(
            "UPDATE conversation_turns
             SET is_helpful = ?2, feedback = ?3
             WHERE id = ?1 AND is_helpful IS NULL",
            rusqlite::params![turn_id, is_helpful, feedback],
        )?;
        Ok(updated == 1)
    }
}
