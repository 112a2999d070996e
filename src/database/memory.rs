//! In-process [`MessageStore`] used by the test suites and when the service
//! runs without `DATABASE_URL`. Every operation takes the single state lock
//! once, which gives it the same atomicity the Postgres store gets from
//! unique indexes and transactions.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::database::store::{MessageStore, TimeWindow};
use crate::error::{Error, Result};
use crate::models::channel_account::ChannelAccount;
use crate::models::conversation::{Channel, Conversation, IdentityBackfill, NewConversation};
use crate::models::delivery_attempt::DeliveryAttempt;
use crate::models::message::{Direction, Message, MessageStatus, NewMessage};

#[derive(Default)]
struct State {
    accounts: HashMap<(Channel, String), Uuid>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    attempts: Vec<DeliveryAttempt>,
}

impl State {
    fn conversation_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    state: Mutex<State>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn register_channel_account(&self, account: &ChannelAccount) -> Result<()> {
        self.lock()?
            .accounts
            .insert((account.channel, account.page_id.clone()), account.account_id);
        Ok(())
    }

    async fn owning_account(&self, channel: Channel, page_id: &str) -> Result<Option<Uuid>> {
        Ok(self
            .lock()?
            .accounts
            .get(&(channel, page_id.to_string()))
            .copied())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .lock()?
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn find_by_native_id(
        &self,
        account_id: Uuid,
        channel: Channel,
        native_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .lock()?
            .conversations
            .iter()
            .find(|c| {
                c.account_id == account_id
                    && c.channel == channel
                    && c.channel_native_id.as_deref() == Some(native_id)
            })
            .cloned())
    }

    async fn find_by_subscriber_id(
        &self,
        account_id: Uuid,
        subscriber_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .lock()?
            .conversations
            .iter()
            .filter(|c| {
                c.account_id == account_id
                    && c.subscriber_platform_id.as_deref() == Some(subscriber_id)
            })
            .max_by_key(|c| c.last_message_at)
            .cloned())
    }

    async fn find_by_legacy_id(
        &self,
        account_id: Uuid,
        legacy_display_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .lock()?
            .conversations
            .iter()
            .find(|c| c.account_id == account_id && c.legacy_display_id == legacy_display_id)
            .cloned())
    }

    async fn unidentified_conversations(
        &self,
        account_id: Uuid,
        channel: Channel,
    ) -> Result<Vec<Conversation>> {
        let mut found: Vec<Conversation> = self
            .lock()?
            .conversations
            .iter()
            .filter(|c| {
                c.account_id == account_id && c.channel == channel && c.channel_native_id.is_none()
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(found)
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let mut state = self.lock()?;

        let existing = state.conversations.iter().find(|c| {
            c.account_id == new.account_id
                && (c.legacy_display_id == new.legacy_display_id
                    || (c.channel == new.channel
                        && new.channel_native_id.is_some()
                        && c.channel_native_id == new.channel_native_id))
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            channel: new.channel,
            channel_native_id: new.channel_native_id,
            legacy_display_id: new.legacy_display_id,
            subscriber_platform_id: new.subscriber_platform_id,
            display_name: new.display_name,
            username: new.username,
            profile_image_url: new.profile_image_url,
            last_message_at: None,
            unread_count: 0,
            created_at: Utc::now(),
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn backfill_identity(
        &self,
        id: Uuid,
        backfill: &IdentityBackfill,
    ) -> Result<Option<Conversation>> {
        let mut state = self.lock()?;

        let target = state
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;

        if let (None, Some(native_id)) = (&target.channel_native_id, &backfill.channel_native_id) {
            let taken = state.conversations.iter().any(|c| {
                c.id != id
                    && c.account_id == target.account_id
                    && c.channel == target.channel
                    && c.channel_native_id.as_deref() == Some(native_id.as_str())
            });
            if taken {
                return Ok(None);
            }
        }

        let Some(conversation) = state.conversation_mut(id) else {
            return Err(Error::NotFound("Conversation not found".to_string()));
        };
        if conversation.channel_native_id.is_none() {
            conversation.channel_native_id = backfill.channel_native_id.clone();
        }
        if conversation.subscriber_platform_id.is_none() {
            conversation.subscriber_platform_id = backfill.subscriber_platform_id.clone();
        }
        if conversation.username.is_none() {
            conversation.username = backfill.username.clone();
        }
        if conversation.profile_image_url.is_none() {
            conversation.profile_image_url = backfill.profile_image_url.clone();
        }
        Ok(Some(conversation.clone()))
    }

    async fn mark_read(&self, id: Uuid) -> Result<Option<Conversation>> {
        let mut state = self.lock()?;
        Ok(state.conversation_mut(id).map(|c| {
            c.unread_count = 0;
            c.clone()
        }))
    }

    async fn insert_inbound(
        &self,
        message: NewMessage,
        dedup_window: Duration,
    ) -> Result<Option<Message>> {
        let mut state = self.lock()?;

        let duplicate = state.messages.iter().any(|m| {
            m.conversation_id == message.conversation_id
                && m.direction == Direction::FromContact
                && match &message.provider_message_id {
                    Some(id) => m.provider_message_id.as_deref() == Some(id.as_str()),
                    None => {
                        m.content == message.content
                            && (m.created_at - message.created_at).num_milliseconds().abs()
                                <= dedup_window.num_milliseconds()
                    }
                }
        });
        if duplicate {
            return Ok(None);
        }

        let conversation = state
            .conversation_mut(message.conversation_id)
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;
        conversation.unread_count += 1;
        conversation.last_message_at = conversation.last_message_at.max(Some(message.created_at));

        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            account_id: message.account_id,
            direction: Direction::FromContact,
            message_type: message.message_type,
            content: message.content,
            attachment_url: message.attachment_url,
            provider_message_id: message.provider_message_id,
            is_automated_reply: message.is_automated_reply,
            status: message.status,
            channel: message.channel,
            created_at: message.created_at,
        };
        state.messages.push(stored.clone());
        Ok(Some(stored))
    }

    async fn insert_outbound(&self, message: NewMessage) -> Result<Message> {
        let mut state = self.lock()?;

        let conversation = state
            .conversation_mut(message.conversation_id)
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;
        conversation.last_message_at = conversation.last_message_at.max(Some(message.created_at));

        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            account_id: message.account_id,
            direction: Direction::FromAccount,
            message_type: message.message_type,
            content: message.content,
            attachment_url: message.attachment_url,
            provider_message_id: message.provider_message_id,
            is_automated_reply: message.is_automated_reply,
            status: message.status,
            channel: message.channel,
            created_at: message.created_at,
        };
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn advance_status(
        &self,
        account_id: Uuid,
        channel: Channel,
        provider_message_id: &str,
        status: MessageStatus,
    ) -> Result<u64> {
        let mut changed = 0;
        for message in self.lock()?.messages.iter_mut().filter(|m| {
            m.direction == Direction::FromAccount
                && m.account_id == account_id
                && m.channel == channel
                && m.provider_message_id.as_deref() == Some(provider_message_id)
        }) {
            if message.status.can_advance_to(status) {
                message.status = status;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()?
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.lock()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, conversation_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        Ok(self
            .lock()?
            .attempts
            .iter()
            .filter(|a| a.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn conversations_in_window(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: &TimeWindow,
    ) -> Result<Vec<Conversation>> {
        Ok(self
            .lock()?
            .conversations
            .iter()
            .filter(|c| {
                c.account_id == account_id
                    && channel.map_or(true, |ch| c.channel == ch)
                    && c.created_at <= window.end
                    && c.last_message_at.unwrap_or(c.created_at) >= window.start
            })
            .cloned()
            .collect())
    }

    async fn messages_in_window(
        &self,
        account_id: Uuid,
        channel: Option<Channel>,
        window: &TimeWindow,
    ) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()?
            .messages
            .iter()
            .filter(|m| {
                m.account_id == account_id
                    && channel.map_or(true, |ch| m.channel == ch)
                    && window.contains(m.created_at)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageType;

    fn new_conversation(account_id: Uuid, native: Option<&str>, legacy: &str) -> NewConversation {
        NewConversation {
            account_id,
            channel: Channel::Instagram,
            channel_native_id: native.map(str::to_string),
            legacy_display_id: legacy.to_string(),
            subscriber_platform_id: None,
            display_name: "Ana".to_string(),
            username: None,
            profile_image_url: None,
        }
    }

    fn inbound(conversation: &Conversation, content: &str, mid: Option<&str>) -> NewMessage {
        NewMessage {
            conversation_id: conversation.id,
            account_id: conversation.account_id,
            direction: Direction::FromContact,
            message_type: MessageType::Text,
            content: content.to_string(),
            attachment_url: None,
            provider_message_id: mid.map(str::to_string),
            is_automated_reply: false,
            status: MessageStatus::Received,
            channel: conversation.channel,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_conversation_returns_existing_on_conflict() {
        let store = MemoryMessageStore::new();
        let account = Uuid::new_v4();
        let first = store
            .insert_conversation(new_conversation(account, Some("n1"), "ig:n1"))
            .await
            .unwrap();
        let second = store
            .insert_conversation(new_conversation(account, Some("n1"), "ig:other"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn inbound_dedup_by_provider_id_counts_unread_once() {
        let store = MemoryMessageStore::new();
        let conversation = store
            .insert_conversation(new_conversation(Uuid::new_v4(), Some("n1"), "ig:n1"))
            .await
            .unwrap();

        let window = Duration::seconds(60);
        let first = store
            .insert_inbound(inbound(&conversation, "Oi", Some("mid.1")), window)
            .await
            .unwrap();
        let again = store
            .insert_inbound(inbound(&conversation, "Oi", Some("mid.1")), window)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(again.is_none());
        let reloaded = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(reloaded.unread_count, 1);
    }

    #[tokio::test]
    async fn inbound_dedup_without_provider_id_uses_window() {
        let store = MemoryMessageStore::new();
        let conversation = store
            .insert_conversation(new_conversation(Uuid::new_v4(), None, "wa:5511"))
            .await
            .unwrap();
        let window = Duration::seconds(60);

        let first = inbound(&conversation, "Oi", None);
        let base = first.created_at;
        assert!(store.insert_inbound(first, window).await.unwrap().is_some());

        let mut retry = inbound(&conversation, "Oi", None);
        retry.created_at = base + Duration::seconds(30);
        assert!(store.insert_inbound(retry, window).await.unwrap().is_none());

        let mut later = inbound(&conversation, "Oi", None);
        later.created_at = base + Duration::seconds(120);
        assert!(store.insert_inbound(later, window).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn backfill_refuses_taken_native_id() {
        let store = MemoryMessageStore::new();
        let account = Uuid::new_v4();
        store
            .insert_conversation(new_conversation(account, Some("n1"), "ig:n1"))
            .await
            .unwrap();
        let orphan = store
            .insert_conversation(new_conversation(account, None, "ig:orphan"))
            .await
            .unwrap();

        let backfill = IdentityBackfill {
            channel_native_id: Some("n1".to_string()),
            ..Default::default()
        };
        assert!(store.backfill_identity(orphan.id, &backfill).await.unwrap().is_none());
    }
}
