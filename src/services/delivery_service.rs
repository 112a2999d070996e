use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::database::store::MessageStore;
use crate::error::{Error, Result, TransportError};
use crate::models::conversation::{Channel, Conversation, IdentityBackfill, NewConversation};
use crate::models::delivery_attempt::{DeliveryAttempt, TransportKind};
use crate::models::message::{Direction, Message, MessageStatus, NewMessage};
use crate::services::transport::{
    bounded, OutboundContent, ProviderReceipt, Recipient, SubscriberDirectory, Transport,
};
use crate::utils::phone::normalize_phone;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryResult {
    pub message: Message,
    pub transport: TransportKind,
    pub provider_message_id: Option<String>,
    /// Every transport tried, in order. The last one succeeded.
    pub attempts: Vec<DeliveryAttempt>,
}

/// Outbound providers the router can choose from.
#[derive(Clone)]
pub struct DeliveryTransports {
    pub subscriber_platform: Arc<dyn Transport>,
    pub subscriber_directory: Arc<dyn SubscriberDirectory>,
    pub graph_send: Arc<dyn Transport>,
    pub gateway: Arc<dyn Transport>,
}

/// Sends a reply through the transport chain for the conversation's
/// channel and records the outcome.
///
/// Direct-message channels go through the subscriber platform when a
/// subscriber id is known or can be looked up, then fall back to the Graph
/// Send API addressed by native id. The gateway channel is addressed by the
/// normalized phone number. A transport is never retried; a timeout counts
/// as that transport failing.
#[derive(Clone)]
pub struct DeliveryRouter {
    store: Arc<dyn MessageStore>,
    transports: DeliveryTransports,
    country_code: String,
    timeout: Duration,
}

/// One step of the chain: which transport and who to address.
struct Hop {
    transport: Arc<dyn Transport>,
    address: String,
}

impl DeliveryRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        transports: DeliveryTransports,
        country_code: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transports,
            country_code: country_code.into(),
            timeout,
        }
    }

    pub async fn send(
        &self,
        account_id: Uuid,
        conversation_id: Uuid,
        content: &OutboundContent,
        is_automated_reply: bool,
    ) -> Result<DeliveryResult> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.account_id == account_id)
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;

        let mut attempts = Vec::new();
        let chain = self.plan(&conversation, &mut attempts).await?;

        let mut last_error: Option<TransportError> = None;
        for hop in chain {
            let recipient = Recipient {
                channel: conversation.channel,
                address: hop.address.clone(),
            };
            let outcome = bounded(self.timeout, hop.transport.send(&recipient, content)).await;
            let kind = hop.transport.kind();
            let attempt = self
                .record(&conversation, kind, Some(&hop.address), &outcome)
                .await;
            attempts.push(attempt);

            match outcome {
                Ok(receipt) => {
                    let message = self
                        .persist(&conversation, content, &receipt, is_automated_reply, kind)
                        .await?;
                    return Ok(DeliveryResult {
                        message,
                        transport: kind,
                        provider_message_id: receipt.provider_message_id,
                        attempts,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        let reason = last_error
            .map(|e| e.reason)
            .or_else(|| attempts.last().and_then(|a| a.error.clone()))
            .unwrap_or_else(|| "recipient is not reachable on this channel".to_string());
        warn!(
            %conversation_id,
            attempts = attempts.len(),
            reason = %reason,
            "Delivery failed on every transport"
        );
        Err(Error::DeliveryFailed { reason, attempts })
    }

    /// Sends to a raw phone number on the gateway channel, opening the
    /// conversation when the number is new.
    pub async fn send_to_phone(
        &self,
        account_id: Uuid,
        phone: &str,
        content: &OutboundContent,
        is_automated_reply: bool,
    ) -> Result<DeliveryResult> {
        let phone = normalize_phone(phone, &self.country_code)
            .ok_or_else(|| Error::BadRequest("Phone number has no digits".to_string()))?;

        let existing = match self
            .store
            .find_by_native_id(account_id, Channel::WhatsApp, &phone)
            .await?
        {
            Some(found) => Some(found),
            None => self
                .store
                .find_by_legacy_id(account_id, &phone)
                .await?
                .filter(|c| c.channel == Channel::WhatsApp),
        };
        let conversation = match existing {
            Some(found) => found,
            None => {
                self.store
                    .insert_conversation(NewConversation {
                        account_id,
                        channel: Channel::WhatsApp,
                        channel_native_id: Some(phone.clone()),
                        legacy_display_id: phone.clone(),
                        subscriber_platform_id: None,
                        display_name: phone.clone(),
                        username: None,
                        profile_image_url: None,
                    })
                    .await?
            }
        };

        self.send(account_id, conversation.id, content, is_automated_reply)
            .await
    }

    async fn plan(
        &self,
        conversation: &Conversation,
        attempts: &mut Vec<DeliveryAttempt>,
    ) -> Result<Vec<Hop>> {
        match conversation.channel {
            Channel::Instagram | Channel::Messenger => {
                let mut chain = Vec::new();
                if let Some(subscriber_id) = self.subscriber_id(conversation, attempts).await {
                    chain.push(Hop {
                        transport: self.transports.subscriber_platform.clone(),
                        address: subscriber_id,
                    });
                }
                if let Some(native_id) = &conversation.channel_native_id {
                    chain.push(Hop {
                        transport: self.transports.graph_send.clone(),
                        address: native_id.clone(),
                    });
                }
                Ok(chain)
            }
            Channel::WhatsApp => {
                let phone = [
                    Some(conversation.legacy_display_id.as_str()),
                    conversation.channel_native_id.as_deref(),
                ]
                .into_iter()
                .flatten()
                .find_map(|raw| normalize_phone(raw, &self.country_code))
                .ok_or_else(|| {
                    Error::BadRequest("Conversation has no phone number to address".to_string())
                })?;
                Ok(vec![Hop {
                    transport: self.transports.gateway.clone(),
                    address: phone,
                }])
            }
            other => Err(Error::BadRequest(format!(
                "Sending is not supported on the {} channel",
                other
            ))),
        }
    }

    /// Stored subscriber id, or a best-effort lookup by native id that is
    /// written back on success. A failed lookup counts as a failed attempt
    /// on the subscriber platform.
    async fn subscriber_id(
        &self,
        conversation: &Conversation,
        attempts: &mut Vec<DeliveryAttempt>,
    ) -> Option<String> {
        if let Some(id) = &conversation.subscriber_platform_id {
            return Some(id.clone());
        }
        let native_id = conversation.channel_native_id.as_deref()?;

        let lookup = bounded(
            self.timeout,
            self.transports
                .subscriber_directory
                .find_subscriber(conversation.channel, native_id),
        )
        .await;
        let failure = match lookup {
            Ok(Some(found)) => {
                let backfill = IdentityBackfill {
                    subscriber_platform_id: Some(found.clone()),
                    ..Default::default()
                };
                if let Err(e) = self.store.backfill_identity(conversation.id, &backfill).await {
                    warn!(
                        conversation_id = %conversation.id,
                        error = %e,
                        "Could not store subscriber id"
                    );
                } else {
                    info!(conversation_id = %conversation.id, "Subscriber id found and stored");
                }
                return Some(found);
            }
            Ok(None) => {
                TransportError::new("recipient is not subscribed on the automation platform")
            }
            Err(e) => e,
        };

        let attempt = self
            .record(
                conversation,
                TransportKind::SubscriberPlatform,
                None,
                &Err(failure),
            )
            .await;
        attempts.push(attempt);
        None
    }

    async fn record(
        &self,
        conversation: &Conversation,
        transport: TransportKind,
        recipient: Option<&str>,
        outcome: &std::result::Result<ProviderReceipt, TransportError>,
    ) -> DeliveryAttempt {
        let attempt = match outcome {
            Ok(receipt) => DeliveryAttempt {
                conversation_id: conversation.id,
                transport,
                recipient: recipient.map(str::to_string),
                http_status: Some(i32::from(receipt.http_status)),
                provider_message_id: receipt.provider_message_id.clone(),
                error: None,
                attempted_at: Utc::now(),
            },
            Err(e) => DeliveryAttempt {
                conversation_id: conversation.id,
                transport,
                recipient: recipient.map(str::to_string),
                http_status: e.status.map(i32::from),
                provider_message_id: None,
                error: Some(e.reason.clone()),
                attempted_at: Utc::now(),
            },
        };

        match outcome {
            Ok(_) => info!(
                conversation_id = %conversation.id,
                transport = transport.as_str(),
                status = ?attempt.http_status,
                "Delivery attempt succeeded"
            ),
            Err(e) => warn!(
                conversation_id = %conversation.id,
                transport = transport.as_str(),
                status = ?attempt.http_status,
                reason = %e.reason,
                detail = %e.detail,
                "Delivery attempt failed"
            ),
        }
        if let Err(e) = self.store.record_attempt(&attempt).await {
            warn!(
                conversation_id = %conversation.id,
                error = %e,
                "Could not record delivery attempt"
            );
        }
        attempt
    }

    /// The provider already has the message; a failure here is logged as a
    /// reconciliation gap and never retried.
    async fn persist(
        &self,
        conversation: &Conversation,
        content: &OutboundContent,
        receipt: &ProviderReceipt,
        is_automated_reply: bool,
        transport: TransportKind,
    ) -> Result<Message> {
        let new = NewMessage {
            conversation_id: conversation.id,
            account_id: conversation.account_id,
            direction: Direction::FromAccount,
            message_type: content.message_type,
            content: content.stored_content(),
            attachment_url: content.media_url().map(str::to_string),
            provider_message_id: receipt.provider_message_id.clone(),
            is_automated_reply,
            status: MessageStatus::Sent,
            channel: conversation.channel,
            created_at: Utc::now(),
        };
        self.store.insert_outbound(new).await.map_err(|e| {
            error!(
                conversation_id = %conversation.id,
                transport = transport.as_str(),
                provider_message_id = ?receipt.provider_message_id,
                error = %e,
                "Reconciliation gap: message delivered but not recorded"
            );
            Error::StorePersistence(e.to_string())
        })
    }
}
