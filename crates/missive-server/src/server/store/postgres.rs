//! PostgreSQL message store.
//!
//! Identifiers are stored as `BIGINT`; the 63-bit domain of the identifier
//! newtypes maps onto it without loss. Range reads are served by the
//! `(receiver_id, id)` index.

use super::{IdBound, MessageStore, RangeQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missive_core::{
    StoreError,
    types::{ConversationId, Message, MessageId, MessageType, UserId},
};
use sqlx::{
    FromRow, Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
};
use std::collections::HashSet;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id          BIGINT PRIMARY KEY CHECK (id >= 0),
    sender_id   BIGINT NOT NULL CHECK (sender_id >= 0),
    receiver_id BIGINT NOT NULL CHECK (receiver_id >= 0),
    content     TEXT NOT NULL,
    kind        TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ,
    deleted_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS messages_receiver_id_id_idx ON messages (receiver_id, id);
"#;

const COLUMNS: &str =
    "id, sender_id, receiver_id, content, kind, created_at, updated_at, deleted_at";

/// Postgres error code for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `messages` table and its range index if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: String,
    kind: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let decode = |e: missive_core::Error| StoreError::Decode(e.to_string());

        Ok(Message {
            id: MessageId::try_from(row.id).map_err(decode)?,
            sender_id: UserId::try_from(row.sender_id).map_err(decode)?,
            receiver_id: ConversationId::try_from(row.receiver_id).map_err(decode)?,
            content: row.content,
            kind: row.kind.parse::<MessageType>().map_err(decode)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => StoreError::Unavailable(error.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => StoreError::Decode(error.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn push_insert<'a>(builder: &mut QueryBuilder<'a, Postgres>, messages: &'a [Message]) {
    builder.push(format!("INSERT INTO messages ({COLUMNS}) "));
    builder.push_values(messages, |mut row, message| {
        row.push_bind(message.id.to_i64())
            .push_bind(message.sender_id.to_i64())
            .push_bind(message.receiver_id.to_i64())
            .push_bind(message.content.as_str())
            .push_bind(message.kind.as_str())
            .push_bind(message.created_at)
            .push_bind(message.updated_at)
            .push_bind(message.deleted_at);
    });
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_range(&self, query: &RangeQuery) -> Result<Vec<Message>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM messages WHERE receiver_id = "
        ));
        builder.push_bind(query.predicate.conversation_id.to_i64());

        match query.predicate.id_bound {
            Some(IdBound::GreaterThan(after)) => {
                builder.push(" AND id > ").push_bind(after.to_i64());
            }
            Some(IdBound::LessThan(before)) => {
                builder.push(" AND id < ").push_bind(before.to_i64());
            }
            None => {}
        }

        builder.push(if query.order_by.is_ascending() {
            " ORDER BY id ASC"
        } else {
            " ORDER BY id DESC"
        });

        if let Some(limit) = query.row_limit {
            // Postgres LIMIT is a signed BIGINT.
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<MessageRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut builder = QueryBuilder::new("");
        push_insert(&mut builder, std::slice::from_ref(message));

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate {
                        id: message.id.get(),
                    }
                } else {
                    map_sqlx_error(e)
                }
            })?;
        Ok(())
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::with_capacity(messages.len());
        if let Some(dup) = messages.iter().find(|m| !seen.insert(m.id)) {
            return Err(StoreError::Duplicate { id: dup.id.get() });
        }

        let ids: Vec<i64> = messages.iter().map(|m| m.id.to_i64()).collect();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM messages WHERE id = ANY($1) ORDER BY id LIMIT 1")
                .bind(&ids)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        if let Some((id,)) = existing {
            return Err(StoreError::Duplicate { id: id as u64 });
        }

        // Stay well under the 65535 bind parameter limit per statement.
        for chunk in messages.chunks(1000) {
            let mut builder = QueryBuilder::new("");
            push_insert(&mut builder, chunk);
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_message_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id.to_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(Message::try_from).transpose()
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
