use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::store::{MessageStore, TimeWindow};
use crate::error::{Error, Result};
use crate::models::channel_account::ChannelAccount;
use crate::models::conversation::{Channel, Conversation, IdentityBackfill, NewConversation};
use crate::models::delivery_attempt::DeliveryAttempt;
use crate::models::message::{Direction, Message, MessageStatus, NewMessage};

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn register_channel_account(&self, account: &ChannelAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_accounts (channel, page_id, account_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel, page_id) DO UPDATE SET account_id = EXCLUDED.account_id
            "#,
        )
        .bind(account.channel.as_str())
        .bind(&account.page_id)
        .bind(account.account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn owning_account(&self, channel: Channel, page_id: &str) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"SELECT account_id FROM channel_accounts WHERE channel = $1 AND page_id = $2"#,
        )
        .bind(channel.as_str())
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation =
            sqlx::query_as::<_, Conversation>(r#"SELECT * FROM conversations WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(conversation)
    }

    async fn find_by_native_id(
        &self,
        account_id: Uuid,
        channel: Channel,
        native_id: &str,
    ) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE account_id = $1 AND channel = $2 AND channel_native_id = $3
            "#,
        )
        .bind(account_id)
        .bind(channel.as_str())
        .bind(native_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn find_by_subscriber_id(
        &self,
        account_id: Uuid,
        subscriber_id: &str,
    ) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE account_id = $1 AND subscriber_platform_id = $2
            ORDER BY last_message_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn find_by_legacy_id(
        &self,
        account_id: Uuid,
        legacy_display_id: &str,
    ) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"SELECT * FROM conversations WHERE account_id = $1 AND legacy_display_id = $2"#,
        )
        .bind(account_id)
        .bind(legacy_display_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn unidentified_conversations(
        &self,
        account_id: Uuid,
        channel: Channel,
    ) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE account_id = $1 AND channel = $2 AND channel_native_id IS NULL
            ORDER BY last_message_at DESC NULLS LAST
            "#,
        )
        .bind(account_id)
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let inserted = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations
                (account_id, channel, channel_native_id, legacy_display_id,
                 subscriber_platform_id, display_name, username, profile_image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(new.account_id)
        .bind(new.channel.as_str())
        .bind(&new.channel_native_id)
        .bind(&new.legacy_display_id)
        .bind(&new.subscriber_platform_id)
        .bind(&new.display_name)
        .bind(&new.username)
        .bind(&new.profile_image_url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(conversation) = inserted {
            return Ok(conversation);
        }

        // Lost the insert race: hand back the row that won.
        if let Some(native_id) = &new.channel_native_id {
            if let Some(existing) = self
                .find_by_native_id(new.account_id, new.channel, native_id)
                .await?
            {
                return Ok(existing);
            }
        }
        self.find_by_legacy_id(new.account_id, &new.legacy_display_id)
            .await?
            .ok_or_else(|| {
                Error::StorePersistence(format!(
                    "conversation insert for {} conflicted but no existing row was found",
                    new.legacy_display_id
                ))
            })
    }

    async fn backfill_identity(
        &self,
        id: Uuid,
        backfill: &IdentityBackfill,
    ) -> Result<Option<Conversation>> {
        let result = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET
                channel_native_id = COALESCE(channel_native_id, $2),
                subscriber_platform_id = COALESCE(subscriber_platform_id, $3),
                username = COALESCE(username, $4),
                profile_image_url = COALESCE(profile_image_url, $5),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&backfill.channel_native_id)
        .bind(&backfill.subscriber_platform_id)
        .bind(&backfill.username)
        .bind(&backfill.profile_image_url)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(conversation)) => Ok(Some(conversation)),
            Ok(None) => Err(Error::NotFound("Conversation not found".to_string())),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_read(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET unread_count = 0, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn insert_inbound(
        &self,
        message: NewMessage,
        dedup_window: Duration,
    ) -> Result<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        // Serializes inbound writes per conversation for the composite
        // dedup check below.
        sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtext($1::text))"#)
            .bind(message.conversation_id)
            .execute(&mut *tx)
            .await?;

        if message.provider_message_id.is_none() {
            let seen: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM messages
                WHERE conversation_id = $1
                  AND direction = 'from_contact'
                  AND content = $2
                  AND created_at BETWEEN $3 AND $4
                LIMIT 1
                "#,
            )
            .bind(message.conversation_id)
            .bind(&message.content)
            .bind(message.created_at - dedup_window)
            .bind(message.created_at + dedup_window)
            .fetch_optional(&mut *tx)
            .await?;
            if seen.is_some() {
                tx.rollback().await?;
                return Ok(None);
            }
        }

        let inserted = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages
                (conversation_id, account_id, direction, type, content, attachment_url,
                 provider_message_id, is_automated_reply, status, channel, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.account_id)
        .bind(Direction::FromContact.as_str())
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(&message.attachment_url)
        .bind(&message.provider_message_id)
        .bind(message.is_automated_reply)
        .bind(message.status.as_str())
        .bind(message.channel.as_str())
        .bind(message.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = inserted else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE conversations SET
                unread_count = unread_count + 1,
                last_message_at = GREATEST(COALESCE(last_message_at, $2), $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(stored.conversation_id)
        .bind(stored.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(stored))
    }

    async fn insert_outbound(&self, message: NewMessage) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages
                (conversation_id, account_id, direction, type, content, attachment_url,
                 provider_message_id, is_automated_reply, status, channel, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.account_id)
        .bind(Direction::FromAccount.as_str())
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(&message.attachment_url)
        .bind(&message.provider_message_id)
        .bind(message.is_automated_reply)
        .bind(message.status.as_str())
        .bind(message.channel.as_str())
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations SET
                last_message_at = GREATEST(COALESCE(last_message_at, $2), $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(stored.conversation_id)
        .bind(stored.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn advance_status(
        &self,
        account_id: Uuid,
        channel: Channel,
        provider_message_id: &str,
        status: MessageStatus,
    ) -> Result<u64> {
        let from: Vec<String> = status
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        if from.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = $1
            WHERE provider_message_id = $2
              AND direction = 'from_account'
              AND status = ANY($3)
              AND account_id = $4
              AND channel = $5
            "#,
        )
        .bind(status.as_str())
        .bind(provider_message_id)
        .bind(&from)
        .bind(account_id)
        .bind(channel.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_attempts
                (conversation_id, transport, recipient, http_status,
                 provider_message_id, error, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attempt.conversation_id)
        .bind(attempt.transport.as_str())
        .bind(&attempt.recipient)
        .bind(attempt.http_status)
        .bind(&attempt.provider_message_id)
        .bind(&attempt.error)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_attempts(&self, conversation_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT conversation_id, transport, recipient, http_status,
                   provider_message_id, error, attempted_at
            FROM delivery_attempts
            WHERE conversation_id = $1
            ORDER BY attempted_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn conversations_in_window(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: &TimeWindow,
    ) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE account_id = $1
              AND ($2::text IS NULL OR channel = $2)
              AND created_at <= $4
              AND COALESCE(last_message_at, created_at) >= $3
            "#,
        )
        .bind(account_id)
        .bind(channel.map(|c| c.as_str()))
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }

    async fn messages_in_window(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: &TimeWindow,
    ) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE account_id = $1
              AND ($2::text IS NULL OR channel = $2)
              AND created_at BETWEEN $3 AND $4
            ORDER BY created_at ASC
            "#,
        )
        .bind(account_id)
        .bind(channel.map(|c| c.as_str()))
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}
