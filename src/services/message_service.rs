use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::store::MessageStore;
use crate::error::{Error, Result};
use crate::models::conversation::Conversation;
use crate::models::inbound_event::{DeliveryReceipt, InboundEvent, Normalized};
use crate::models::message::{Direction, Message, MessageStatus, NewMessage};
use crate::services::identity_service::{IdentityResolver, MatchPath};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored {
        message: Message,
        matched_by: MatchPath,
    },
    /// The provider re-delivered an event we already hold.
    Duplicate { conversation_id: Uuid },
}

/// Counts for one webhook delivery, returned in the acknowledgement body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub stored: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub echoes_skipped: usize,
    pub receipts_applied: u64,
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    resolver: IdentityResolver,
    dedup_window: chrono::Duration,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        resolver: IdentityResolver,
        dedup_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            dedup_window,
        }
    }

    /// Stores one inbound event against its conversation. Fails with
    /// `NoOwningAccount` when the receiving page is not registered.
    pub async fn ingest(&self, event: &InboundEvent) -> Result<IngestOutcome> {
        let account_id = self
            .store
            .owning_account(event.channel, &event.recipient_id)
            .await?
            .ok_or_else(|| Error::NoOwningAccount {
                channel: event.channel.to_string(),
                page_id: event.recipient_id.clone(),
            })?;

        let resolution = self
            .resolver
            .resolve(account_id, event.channel, &event.sender)
            .await?;
        let conversation = resolution.conversation;

        let inserted = self
            .store
            .insert_inbound(
                NewMessage {
                    conversation_id: conversation.id,
                    account_id,
                    direction: Direction::FromContact,
                    message_type: event.message_type,
                    content: event.content.clone(),
                    attachment_url: event.attachment_url.clone(),
                    provider_message_id: event.provider_message_id.clone(),
                    is_automated_reply: false,
                    status: MessageStatus::Received,
                    channel: conversation.channel,
                    created_at: event.timestamp,
                },
                self.dedup_window,
            )
            .await?;

        match inserted {
            Some(message) => {
                info!(
                    conversation_id = %conversation.id,
                    message_id = %message.id,
                    channel = %conversation.channel,
                    matched_by = ?resolution.matched_by,
                    "Inbound message stored"
                );
                Ok(IngestOutcome::Stored {
                    message,
                    matched_by: resolution.matched_by,
                })
            }
            None => {
                info!(
                    conversation_id = %conversation.id,
                    provider_message_id = ?event.provider_message_id,
                    "Duplicate inbound event ignored"
                );
                Ok(IngestOutcome::Duplicate {
                    conversation_id: conversation.id,
                })
            }
        }
    }

    /// Moves the owning account's outbound messages forward; stale or
    /// out-of-order receipts change nothing, and receipts for unregistered
    /// pages are dropped.
    pub async fn apply_receipt(&self, receipt: &DeliveryReceipt) -> Result<u64> {
        let Some(account_id) = self
            .store
            .owning_account(receipt.channel, &receipt.recipient_id)
            .await?
        else {
            warn!(
                channel = %receipt.channel,
                page_id = %receipt.recipient_id,
                "Dropping receipt for unregistered page"
            );
            return Ok(0);
        };

        let mut changed = 0;
        for provider_message_id in &receipt.provider_message_ids {
            changed += self
                .store
                .advance_status(account_id, receipt.channel, provider_message_id, receipt.status)
                .await?;
        }
        debug!(
            channel = %receipt.channel,
            status = receipt.status.as_str(),
            changed,
            "Delivery receipt applied"
        );
        Ok(changed)
    }

    /// Ingests a normalized webhook delivery. Events for unregistered pages
    /// are dropped and logged; store failures abort so the provider retries.
    pub async fn ingest_batch(&self, batch: &Normalized) -> Result<IngestReport> {
        let mut report = IngestReport {
            echoes_skipped: batch.echoes_skipped,
            ..Default::default()
        };

        for event in &batch.events {
            match self.ingest(event).await {
                Ok(IngestOutcome::Stored { .. }) => report.stored += 1,
                Ok(IngestOutcome::Duplicate { .. }) => report.duplicates += 1,
                Err(err @ Error::NoOwningAccount { .. }) => {
                    warn!(error = %err, "Dropping inbound event");
                    report.dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        for receipt in &batch.receipts {
            report.receipts_applied += self.apply_receipt(receipt).await?;
        }
        Ok(report)
    }

    /// The conversation, when it belongs to `account_id`. Other accounts'
    /// conversations are reported as missing.
    pub async fn conversation(
        &self,
        account_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.account_id == account_id)
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))
    }

    pub async fn history(&self, account_id: Uuid, conversation_id: Uuid) -> Result<Vec<Message>> {
        let conversation = self.conversation(account_id, conversation_id).await?;
        self.store.list_messages(conversation.id).await
    }

    pub async fn mark_read(&self, account_id: Uuid, conversation_id: Uuid) -> Result<Conversation> {
        let conversation = self.conversation(account_id, conversation_id).await?;
        self.store
            .mark_read(conversation.id)
            .await?
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryMessageStore;
    use crate::database::store::TimeWindow;
    use crate::models::channel_account::ChannelAccount;
    use crate::models::conversation::Channel;
    use crate::models::inbound_event::SenderIdentity;
    use crate::models::message::MessageType;
    use chrono::Utc;

    async fn service_with_page(page: &str) -> (MessageService, Arc<MemoryMessageStore>, Uuid) {
        let store = Arc::new(MemoryMessageStore::new());
        let account_id = Uuid::new_v4();
        store
            .register_channel_account(&ChannelAccount {
                channel: Channel::Instagram,
                page_id: page.to_string(),
                account_id,
            })
            .await
            .unwrap();
        let service = MessageService::new(
            store.clone(),
            IdentityResolver::new(store.clone()),
            chrono::Duration::seconds(60),
        );
        (service, store, account_id)
    }

    fn event(page: &str, mid: Option<&str>) -> InboundEvent {
        InboundEvent {
            channel: Channel::Instagram,
            recipient_id: page.to_string(),
            sender: SenderIdentity {
                channel_native_id: Some("9001".into()),
                display_name: Some("Ana".into()),
                ..Default::default()
            },
            message_type: MessageType::Text,
            content: "Oi".into(),
            attachment_url: None,
            provider_message_id: mid.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn redelivery_is_stored_once() {
        let (service, store, _) = service_with_page("IG1").await;
        let first = service.ingest(&event("IG1", Some("m_1"))).await.unwrap();
        let second = service.ingest(&event("IG1", Some("m_1"))).await.unwrap();

        let IngestOutcome::Stored { message, matched_by } = first else {
            panic!("first delivery should be stored");
        };
        assert_eq!(matched_by, MatchPath::Created);
        assert_eq!(
            second,
            IngestOutcome::Duplicate {
                conversation_id: message.conversation_id
            }
        );
        let conversation = store
            .get_conversation(message.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.unread_count, 1);
        assert_eq!(store.list_messages(conversation.id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_first_messages_share_one_conversation() {
        let (service, store, account_id) = service_with_page("IG1").await;

        let (a, b) = {
            let first = service.clone();
            let second = service.clone();
            tokio::join!(
                tokio::spawn(async move { first.ingest(&event("IG1", Some("m_a"))).await }),
                tokio::spawn(async move { second.ingest(&event("IG1", Some("m_b"))).await }),
            )
        };
        let conversation_of = |outcome: IngestOutcome| match outcome {
            IngestOutcome::Stored { message, .. } => message.conversation_id,
            IngestOutcome::Duplicate { .. } => panic!("distinct messages must both be stored"),
        };
        let a = conversation_of(a.unwrap().unwrap());
        let b = conversation_of(b.unwrap().unwrap());
        assert_eq!(a, b);

        let window = TimeWindow::new(
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
        )
        .unwrap();
        let conversations = store
            .conversations_in_window(account_id, Some(Channel::Instagram), &window)
            .await
            .unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].unread_count, 2);
        assert_eq!(store.list_messages(a).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unregistered_page_fails_closed() {
        let (service, _, _) = service_with_page("IG1").await;
        let err = service.ingest(&event("OTHER", None)).await.unwrap_err();
        assert!(matches!(err, Error::NoOwningAccount { .. }));

        let report = service
            .ingest_batch(&Normalized {
                events: vec![event("OTHER", None), event("IG1", Some("m_2"))],
                receipts: vec![],
                echoes_skipped: 1,
            })
            .await
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.stored, 1);
        assert_eq!(report.echoes_skipped, 1);
    }

    #[tokio::test]
    async fn receipts_only_move_forward() {
        let (service, store, account_id) = service_with_page("IG1").await;
        let IngestOutcome::Stored { message, .. } =
            service.ingest(&event("IG1", Some("m_in"))).await.unwrap()
        else {
            panic!("expected a stored message");
        };
        store
            .insert_outbound(NewMessage {
                conversation_id: message.conversation_id,
                account_id,
                direction: Direction::FromAccount,
                message_type: MessageType::Text,
                content: "Olá!".into(),
                attachment_url: None,
                provider_message_id: Some("m_out".into()),
                is_automated_reply: false,
                status: MessageStatus::Sent,
                channel: Channel::Instagram,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let read = DeliveryReceipt {
            channel: Channel::Instagram,
            recipient_id: "IG1".into(),
            provider_message_ids: vec!["m_out".into()],
            status: MessageStatus::Read,
        };
        let late_delivery = DeliveryReceipt {
            status: MessageStatus::Delivered,
            ..read.clone()
        };
        let from_unregistered_page = DeliveryReceipt {
            recipient_id: "OTHER".into(),
            status: MessageStatus::Delivered,
            ..read.clone()
        };
        for (channel, page_id, owner) in [
            (Channel::Messenger, "FB1", account_id),
            (Channel::Instagram, "IG2", Uuid::new_v4()),
        ] {
            store
                .register_channel_account(&ChannelAccount {
                    channel,
                    page_id: page_id.to_string(),
                    account_id: owner,
                })
                .await
                .unwrap();
        }
        let on_other_channel = DeliveryReceipt {
            channel: Channel::Messenger,
            recipient_id: "FB1".into(),
            ..read.clone()
        };
        let for_other_account = DeliveryReceipt {
            recipient_id: "IG2".into(),
            ..read.clone()
        };
        assert_eq!(service.apply_receipt(&from_unregistered_page).await.unwrap(), 0);
        assert_eq!(service.apply_receipt(&on_other_channel).await.unwrap(), 0);
        assert_eq!(service.apply_receipt(&for_other_account).await.unwrap(), 0);
        assert_eq!(
            service.history(account_id, message.conversation_id).await.unwrap()[1].status,
            MessageStatus::Sent
        );

        assert_eq!(service.apply_receipt(&read).await.unwrap(), 1);
        assert_eq!(service.apply_receipt(&late_delivery).await.unwrap(), 0);

        let history = service
            .history(account_id, message.conversation_id)
            .await
            .unwrap();
        assert_eq!(history[1].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn mark_read_resets_unread_for_owner_only() {
        let (service, _, account_id) = service_with_page("IG1").await;
        let IngestOutcome::Stored { message, .. } =
            service.ingest(&event("IG1", Some("m_1"))).await.unwrap()
        else {
            panic!("expected a stored message");
        };

        let foreign = service.mark_read(Uuid::new_v4(), message.conversation_id).await;
        assert!(matches!(foreign, Err(Error::NotFound(_))));

        let conversation = service
            .mark_read(account_id, message.conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.unread_count, 0);
    }
}
