use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::channel_account::ChannelAccount;
use crate::models::conversation::{Channel, Conversation, IdentityBackfill, NewConversation};
use crate::models::delivery_attempt::DeliveryAttempt;
use crate::models::message::{Message, MessageStatus, NewMessage};

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(Error::BadRequest(
                "time window end must not be before its start".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Durable record of conversations and messages.
///
/// All uniqueness guarantees live here, enforced atomically by the
/// implementation: one conversation per `(account, channel, native id)` and
/// per `(account, legacy id)`, one inbound message per provider message id
/// within a conversation. Callers hold no locks of their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn register_channel_account(&self, account: &ChannelAccount) -> Result<()>;

    async fn owning_account(&self, channel: Channel, page_id: &str) -> Result<Option<Uuid>>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    async fn find_by_native_id(
        &self,
        account_id: Uuid,
        channel: Channel,
        native_id: &str,
    ) -> Result<Option<Conversation>>;

    async fn find_by_subscriber_id(
        &self,
        account_id: Uuid,
        subscriber_id: &str,
    ) -> Result<Option<Conversation>>;

    async fn find_by_legacy_id(
        &self,
        account_id: Uuid,
        legacy_display_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Conversations on `channel` that still lack a channel-native id.
    async fn unidentified_conversations(
        &self,
        account_id: Uuid,
        channel: Channel,
    ) -> Result<Vec<Conversation>>;

    /// Insert-or-fetch: when a concurrent insert already created the row,
    /// the existing row is returned instead of an error.
    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation>;

    /// Writes only the fields that are still empty on the row. Returns
    /// `None` when the native id is already held by another conversation.
    async fn backfill_identity(
        &self,
        id: Uuid,
        backfill: &IdentityBackfill,
    ) -> Result<Option<Conversation>>;

    /// Resets the unread counter to zero.
    async fn mark_read(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Stores an inbound message, bumping the conversation's unread counter
    /// and last-message time in the same unit of work. Returns `None` for a
    /// duplicate: same provider message id, or (when there is none) same
    /// content within `dedup_window` of the message time.
    async fn insert_inbound(
        &self,
        message: NewMessage,
        dedup_window: Duration,
    ) -> Result<Option<Message>>;

    /// Stores an outbound message and moves the conversation's last-message
    /// time forward.
    async fn insert_outbound(&self, message: NewMessage) -> Result<Message>;

    /// Moves the account's outbound messages on `channel` with this provider
    /// id to `status` when that is a forward transition. Returns the number
    /// of rows changed.
    async fn advance_status(
        &self,
        account_id: Uuid,
        channel: Channel,
        provider_message_id: &str,
        status: MessageStatus,
    ) -> Result<u64>;

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    async fn list_attempts(&self, conversation_id: Uuid) -> Result<Vec<DeliveryAttempt>>;

    /// Conversations created before the window ends whose last activity is
    /// not before it starts.
    async fn conversations_in_window(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: &TimeWindow,
    ) -> Result<Vec<Conversation>>;

    async fn messages_in_window(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: &TimeWindow,
    ) -> Result<Vec<Message>>;
}
