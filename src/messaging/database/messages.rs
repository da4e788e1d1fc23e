use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Database, DatabaseError, utils::now_millis, utils::parse_timestamp};
use crate::messaging::channels::{ChannelId, ParticipantId};
use crate::messaging::error::{MessagingError, Result};
use crate::messaging::message_store::{Message, MessageId, MessageStore};
use crate::messaging::message_streaming::MessageBus;

#[derive(Debug)]
struct MessageRow {
    id: String,
    channel: String,
    sender: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl<'r, R> sqlx::FromRow<'r, R> for MessageRow
where
    R: sqlx::Row,
    &'r str: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    fn from_row(row: &'r R) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            channel: row.try_get("channel")?,
            sender: row.try_get("sender")?,
            content: row.try_get("content")?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }
}

impl MessageRow {
    fn into_message(self) -> Message {
        Message {
            id: MessageId::new(self.id),
            channel: ChannelId::named(self.channel),
            sender: ParticipantId::new(self.sender),
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// Message log in SQLite. Every accepted message is published on the bus
/// after its insert commits.
pub struct SqliteMessageStore {
    database: Arc<Database>,
    bus: Arc<MessageBus>,
    // Serialises insert + publish so bus order matches acceptance order.
    write_lock: Mutex<()>,
}

impl SqliteMessageStore {
    pub fn new(database: Arc<Database>, bus: Arc<MessageBus>) -> Self {
        Self {
            database,
            bus,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(
        &self,
        channel: &ChannelId,
        sender: &ParticipantId,
        content: &str,
    ) -> Result<Message> {
        if content.is_empty() {
            return Err(MessagingError::Rejected(
                "message content must not be empty".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        let message = Message {
            id: MessageId::generate(),
            channel: channel.clone(),
            sender: sender.clone(),
            content: content.to_string(),
            created_at: now_millis(),
        };

        sqlx::query(
            "INSERT INTO messages (id, channel, sender, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id.as_str())
        .bind(message.channel.as_str())
        .bind(message.sender.as_str())
        .bind(&message.content)
        .bind(message.created_at.timestamp_millis())
        .execute(&self.database.pool)
        .await
        .map_err(DatabaseError::from)?;

        let delivered = self.bus.emit(&message);
        tracing::debug!(
            target: "aula_messaging::database::messages",
            "Stored message {} on {} (live subscribers: {})",
            message.id,
            message.channel,
            delivered
        );

        Ok(message)
    }

    async fn history(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, channel, sender, content, created_at FROM messages
             WHERE channel = ?
             ORDER BY created_at DESC, seq DESC
             LIMIT ?",
        )
        .bind(channel.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.database.pool)
        .await
        .map_err(DatabaseError::from)?;

        // Newest-first from the query, oldest-first for display.
        Ok(rows.into_iter().rev().map(MessageRow::into_message).collect())
    }

    async fn recent_across(&self, channels: &[ChannelId], limit: usize) -> Result<Vec<Message>> {
        if channels.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = "?,".repeat(channels.len());
        let placeholders = placeholders.trim_end_matches(',');
        let query = format!(
            "SELECT id, channel, sender, content, created_at FROM messages
             WHERE channel IN ({})
             ORDER BY created_at DESC, seq DESC
             LIMIT ?",
            placeholders
        );

        let mut query_builder = sqlx::query_as::<_, MessageRow>(&query);
        for channel in channels {
            query_builder = query_builder.bind(channel.as_str());
        }
        let rows = query_builder
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.database.pool)
            .await
            .map_err(DatabaseError::from)?;

        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channels::ChannelFilter;
    use crate::messaging::message_streaming::RealtimeBus;
    use crate::messaging::test_utils::create_test_backend;

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::new(id)
    }

    #[tokio::test]
    async fn test_append_assigns_id_and_timestamp() {
        let (backend, _data_temp) = create_test_backend().await;
        let general = ChannelId::named("general");

        let first = backend.store.append(&general, &pid("u1"), "hola").await.unwrap();
        let second = backend.store.append(&general, &pid("u1"), "hola").await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(first.created_at <= second.created_at);
        assert_eq!(first.content, "hola");
        assert_eq!(first.channel, general);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_content() {
        let (backend, _data_temp) = create_test_backend().await;
        let general = ChannelId::named("general");

        let result = backend.store.append(&general, &pid("u1"), "").await;

        assert!(matches!(result, Err(MessagingError::Rejected(_))));
        assert!(backend.store.history(&general, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_chronological_and_bounded() {
        let (backend, _data_temp) = create_test_backend().await;
        let general = ChannelId::named("general");

        for i in 0..5 {
            backend
                .store
                .append(&general, &pid("u1"), &format!("m{i}"))
                .await
                .unwrap();
        }

        let history = backend.store.history(&general, 3).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_history_is_restartable() {
        let (backend, _data_temp) = create_test_backend().await;
        let channel = ChannelId::direct(&pid("u1"), &pid("u2"));

        backend.store.append(&channel, &pid("u1"), "a").await.unwrap();
        backend.store.append(&channel, &pid("u2"), "b").await.unwrap();

        let first = backend.store.history(&channel, 200).await.unwrap();
        let second = backend.store.history(&channel, 200).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_scoped_to_channel() {
        let (backend, _data_temp) = create_test_backend().await;
        let general = ChannelId::named("general");
        let direct = ChannelId::direct(&pid("u1"), &pid("u2"));

        backend.store.append(&general, &pid("u1"), "public").await.unwrap();
        backend.store.append(&direct, &pid("u1"), "private").await.unwrap();

        let history = backend.store.history(&direct, 200).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "private");
    }

    #[tokio::test]
    async fn test_recent_across_is_newest_first() {
        let (backend, _data_temp) = create_test_backend().await;
        let general = ChannelId::named("general");
        let a = ChannelId::direct(&pid("t1"), &pid("s1"));
        let b = ChannelId::direct(&pid("t1"), &pid("s2"));
        let unrelated = ChannelId::direct(&pid("t2"), &pid("s3"));

        backend.store.append(&a, &pid("s1"), "a1").await.unwrap();
        backend.store.append(&general, &pid("t1"), "g1").await.unwrap();
        backend.store.append(&b, &pid("s2"), "b1").await.unwrap();
        backend.store.append(&unrelated, &pid("s3"), "x").await.unwrap();

        let recent = backend
            .store
            .recent_across(&[general, a, b], 400)
            .await
            .unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b1", "g1", "a1"]);
    }

    #[tokio::test]
    async fn test_recent_across_empty_input() {
        let (backend, _data_temp) = create_test_backend().await;
        let recent = backend.store.recent_across(&[], 400).await.unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn test_append_publishes_on_bus() {
        let (backend, _data_temp) = create_test_backend().await;
        let general = ChannelId::named("general");
        let mut subscription = backend.bus.subscribe(ChannelFilter::Exact(general.clone()));

        let stored = backend.store.append(&general, &pid("u1"), "live").await.unwrap();

        let delivered = subscription.recv().await.unwrap();
        assert_eq!(delivered, stored);
    }
}
