use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use concourse_core::Message;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};

pub const CONVERSATION_TTL_HOURS: i64 = 24;
pub const MAX_MESSAGES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub expires_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(conversation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            expires_at: now + Duration::hours(CONVERSATION_TTL_HOURS),
            messages: Vec::new(),
        }
    }

    /// Appends one exchange, keeps the newest `max_messages` and pushes the
    /// expiry forward.
    pub fn record_exchange(
        &mut self,
        user_text: &str,
        assistant_text: &str,
        max_messages: usize,
        now: DateTime<Utc>,
    ) {
        self.messages.push(Message::user(user_text));
        self.messages.push(Message::assistant(assistant_text));
        if self.messages.len() > max_messages {
            let keep_from = self.messages.len() - max_messages;
            self.messages = self.messages.split_off(keep_from);
        }
        self.expires_at = now + Duration::hours(CONVERSATION_TTL_HOURS);
    }
}

/// Conversation history persisted between turns. Expired conversations are
/// never returned.
pub trait HistoryRepository: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>>;
    async fn upsert(&self, conversation: &Conversation) -> Result<()>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Loads or starts the conversation and records one exchange as a single
    /// step, so concurrent turns on one conversation never drop an exchange.
    async fn append_exchange(
        &self,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        max_messages: usize,
        now: DateTime<Utc>,
    ) -> Result<Conversation>;
}

pub async fn record_turn<R: HistoryRepository>(
    repository: &R,
    conversation_id: &str,
    user_text: &str,
    assistant_text: &str,
    max_messages: usize,
) -> Result<Conversation> {
    repository
        .append_exchange(conversation_id, user_text, assistant_text, max_messages, Utc::now())
        .await
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryRepository for MemoryStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let now = Utc::now();
        Ok(self
            .conversations
            .read()
            .get(conversation_id)
            .filter(|conversation| conversation.expires_at > now)
            .cloned())
    }

    async fn upsert(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .insert(conversation.conversation_id.clone(), conversation.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0_u64;
        self.conversations.write().retain(|_, value| {
            let keep = value.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }

    async fn append_exchange(
        &self,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        max_messages: usize,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id, now));
        if conversation.expires_at <= now {
            *conversation = Conversation::new(conversation_id, now);
        }

        conversation.record_exchange(user_text, assistant_text, max_messages, now);
        Ok(conversation.clone())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
              conversation_id TEXT PRIMARY KEY,
              expires_at TEXT NOT NULL,
              messages_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    let expires_at: DateTime<Utc> = row
        .get::<String, _>("expires_at")
        .parse()
        .context("stored conversation has an invalid expiry")?;

    let messages_json: String = row.get("messages_json");
    let messages = serde_json::from_str(&messages_json)
        .context("stored conversation has unreadable messages")?;

    Ok(Conversation {
        conversation_id: row.get("conversation_id"),
        expires_at,
        messages,
    })
}

async fn write_conversation<'e, E: SqliteExecutor<'e>>(
    executor: E,
    conversation: &Conversation,
) -> Result<()> {
    let messages_json = serde_json::to_string(&conversation.messages)?;

    sqlx::query(
        r#"
        INSERT INTO conversations (conversation_id, expires_at, messages_json)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(conversation_id) DO UPDATE SET
          expires_at=excluded.expires_at,
          messages_json=excluded.messages_json
        "#,
    )
    .bind(&conversation.conversation_id)
    .bind(conversation.expires_at.to_rfc3339())
    .bind(messages_json)
    .execute(executor)
    .await?;

    Ok(())
}

const SELECT_CONVERSATION: &str = r#"
    SELECT conversation_id, expires_at, messages_json
    FROM conversations
    WHERE conversation_id = ?1
"#;

impl HistoryRepository for SqliteStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(SELECT_CONVERSATION)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let conversation = conversation_from_row(&row)?;
        if conversation.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(conversation))
    }

    async fn upsert(&self, conversation: &Conversation) -> Result<()> {
        write_conversation(&self.pool, conversation).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversations WHERE expires_at < ?1")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn append_exchange(
        &self,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        max_messages: usize,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes the database write lock before the read.
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, expires_at, messages_json)
            VALUES (?1, ?2, '[]')
            ON CONFLICT(conversation_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(SELECT_CONVERSATION)
            .bind(conversation_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut conversation = conversation_from_row(&row)?;
        if conversation.expires_at <= now {
            conversation = Conversation::new(conversation_id, now);
        }

        conversation.record_exchange(user_text, assistant_text, max_messages, now);
        write_conversation(&mut *tx, &conversation).await?;
        tx.commit().await?;

        Ok(conversation)
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl HistoryRepository for Store {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        match self {
            Store::Memory(store) => store.load(conversation_id).await,
            Store::Sqlite(store) => store.load(conversation_id).await,
        }
    }

    async fn upsert(&self, conversation: &Conversation) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert(conversation).await,
            Store::Sqlite(store) => store.upsert(conversation).await,
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self {
            Store::Memory(store) => store.purge_expired(now).await,
            Store::Sqlite(store) => store.purge_expired(now).await,
        }
    }

    async fn append_exchange(
        &self,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        max_messages: usize,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        match self {
            Store::Memory(store) => {
                store
                    .append_exchange(conversation_id, user_text, assistant_text, max_messages, now)
                    .await
            }
            Store::Sqlite(store) => {
                store
                    .append_exchange(conversation_id, user_text, assistant_text, max_messages, now)
                    .await
            }
        }
    }
}
