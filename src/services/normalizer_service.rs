use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::dto::webhook_dto::{
    GatewayMedia, GatewayWebhook, ManyChatWebhook, MetaMessage, MetaMessaging, MetaWebhook,
    VerifyQuery,
};
use crate::error::{Error, Result};
use crate::models::conversation::Channel;
use crate::models::inbound_event::{DeliveryReceipt, InboundEvent, Normalized, SenderIdentity};
use crate::models::message::{MessageStatus, MessageType};
use crate::utils::phone::normalize_phone;
use crate::utils::signature::secrets_match;
use crate::utils::time::{from_rfc3339, from_unix_flexible};

/// Webhook source. Decides which adapter parses the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Graph webhooks for Instagram and Messenger.
    Meta,
    ManyChat,
    WhatsAppGateway,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Meta => "meta",
            Provider::ManyChat => "manychat",
            Provider::WhatsAppGateway => "whatsapp_gateway",
        }
    }

    /// Providers that retry aggressively on non-2xx get a 200 even for
    /// payloads we cannot parse.
    pub fn acks_malformed(&self) -> bool {
        !matches!(self, Provider::ManyChat)
    }
}

/// Translates provider payloads into [`InboundEvent`]s and
/// [`DeliveryReceipt`]s. Stateless apart from the phone country code.
#[derive(Debug, Clone)]
pub struct NormalizerService {
    country_code: String,
}

impl NormalizerService {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    pub fn normalize(&self, provider: Provider, body: &[u8]) -> Result<Normalized> {
        let normalized = match provider {
            Provider::Meta => self.normalize_meta(parse(body)?)?,
            Provider::ManyChat => self.normalize_manychat(parse(body)?)?,
            Provider::WhatsAppGateway => self.normalize_gateway(parse(body)?)?,
        };
        debug!(
            provider = provider.as_str(),
            events = normalized.events.len(),
            receipts = normalized.receipts.len(),
            echoes = normalized.echoes_skipped,
            "Webhook normalized"
        );
        Ok(normalized)
    }

    /// Answers a subscription handshake with its challenge, or `Forbidden`.
    pub fn verify_handshake(query: &VerifyQuery, expected_token: &str) -> Result<String> {
        let subscribing = query.mode.as_deref() == Some("subscribe");
        let token_ok = query
            .verify_token
            .as_deref()
            .map(|t| !expected_token.is_empty() && secrets_match(t, expected_token))
            .unwrap_or(false);
        match (&query.challenge, subscribing && token_ok) {
            (Some(challenge), true) => Ok(challenge.clone()),
            _ => Err(Error::Forbidden("Webhook verification failed".to_string())),
        }
    }

    fn normalize_meta(&self, payload: MetaWebhook) -> Result<Normalized> {
        let channel = match payload.object.as_str() {
            "instagram" => Channel::Instagram,
            "page" => Channel::Messenger,
            other => {
                return Err(Error::MalformedPayload(format!(
                    "unsupported webhook object: {}",
                    other
                )))
            }
        };

        let mut out = Normalized::default();
        for entry in payload.entry {
            for item in entry.messaging {
                let receipt_page = item.recipient.id.clone().or_else(|| entry.id.clone());
                if let (Some(delivery), Some(page)) = (&item.delivery, &receipt_page) {
                    if !delivery.mids.is_empty() {
                        out.receipts.push(DeliveryReceipt {
                            channel,
                            recipient_id: page.clone(),
                            provider_message_ids: delivery.mids.clone(),
                            status: MessageStatus::Delivered,
                        });
                    }
                }
                // Watermark-only reads carry no message id and are ignored.
                let read_mid = item.read.as_ref().and_then(|r| r.mid.clone());
                if let (Some(mid), Some(page)) = (read_mid, &receipt_page) {
                    out.receipts.push(DeliveryReceipt {
                        channel,
                        recipient_id: page.clone(),
                        provider_message_ids: vec![mid],
                        status: MessageStatus::Read,
                    });
                }
                let Some(message) = &item.message else {
                    continue;
                };

                let sender = item.sender.id.clone();
                let page = item.recipient.id.clone().or_else(|| entry.id.clone());
                if message.is_echo || (sender.is_some() && sender == entry.id) {
                    out.echoes_skipped += 1;
                    continue;
                }
                if message.is_deleted {
                    continue;
                }
                let (Some(sender), Some(page)) = (sender, page) else {
                    warn!(%channel, "Dropping message without sender or recipient id");
                    continue;
                };
                let timestamp = item
                    .timestamp
                    .or(entry.time)
                    .and_then(from_unix_flexible)
                    .unwrap_or_else(Utc::now);
                out.events
                    .extend(meta_events(channel, &item, message, sender, page, timestamp));
            }
        }
        Ok(out)
    }

    fn normalize_manychat(&self, payload: ManyChatWebhook) -> Result<Normalized> {
        let page_id = payload
            .page_id
            .clone()
            .ok_or_else(|| Error::MalformedPayload("missing page_id".to_string()))?;
        let subscriber = &payload.subscriber;
        let channel = match payload.channel.as_deref() {
            Some(raw) => raw
                .parse::<Channel>()
                .map_err(Error::MalformedPayload)?,
            None if subscriber.ig_id.is_some() || subscriber.ig_username.is_some() => {
                Channel::Instagram
            }
            None => Channel::Messenger,
        };

        if payload.is_echo {
            return Ok(Normalized {
                echoes_skipped: 1,
                ..Default::default()
            });
        }
        if subscriber.id.is_none() {
            return Err(Error::MalformedPayload(
                "missing subscriber id".to_string(),
            ));
        }

        let channel_native_id = match channel {
            Channel::Instagram => subscriber.ig_id.clone(),
            Channel::Messenger => subscriber.psid.clone(),
            _ => None,
        };
        let display_name = non_empty(subscriber.name.clone()).or_else(|| {
            let joined = [subscriber.first_name.clone(), subscriber.last_name.clone()]
                .into_iter()
                .flatten()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            non_empty(Some(joined))
        });

        let message = payload.message.as_ref();
        let text = non_empty(message.and_then(|m| m.text.clone()))
            .or_else(|| non_empty(payload.last_input_text.clone()));
        let attachment_url = non_empty(message.and_then(|m| m.url.clone()));
        let message_type = match message.and_then(|m| m.kind.as_deref()) {
            Some("text") | None => {
                if attachment_url.is_some() {
                    MessageType::Document
                } else {
                    MessageType::Text
                }
            }
            Some(tag) => MessageType::from_attachment_tag(tag),
        };
        let content = body_or_placeholder(text, message_type)
            .ok_or_else(|| Error::MalformedPayload("message has no content".to_string()))?;

        let event = InboundEvent {
            channel,
            recipient_id: page_id,
            sender: SenderIdentity {
                channel_native_id,
                legacy_display_id: None,
                subscriber_platform_id: subscriber.id.clone(),
                display_name,
                username: non_empty(subscriber.ig_username.clone())
                    .map(|u| u.trim_start_matches('@').to_string()),
                profile_image_url: non_empty(subscriber.profile_pic.clone()),
            },
            message_type,
            content,
            attachment_url,
            provider_message_id: message.and_then(|m| m.id.clone()),
            timestamp: flexible_timestamp(payload.timestamp.as_ref()),
        };
        Ok(Normalized {
            events: vec![event],
            ..Default::default()
        })
    }

    fn normalize_gateway(&self, payload: GatewayWebhook) -> Result<Normalized> {
        let kind = payload.kind.as_deref().unwrap_or("ReceivedCallback");
        let mut out = Normalized::default();

        if kind == "MessageStatusCallback" {
            let status = match payload.status.as_deref().map(str::to_ascii_uppercase) {
                Some(s) if s == "RECEIVED" || s == "DELIVERED" => Some(MessageStatus::Delivered),
                Some(s) if s == "READ" || s == "PLAYED" || s == "READ_BY_ME" => {
                    Some(MessageStatus::Read)
                }
                Some(s) if s == "FAILED" || s == "ERROR" => Some(MessageStatus::Failed),
                _ => None,
            };
            let mut ids = payload.ids.clone();
            if ids.is_empty() {
                ids.extend(payload.message_id.clone());
            }
            let instance = payload.instance_id.clone().filter(|i| !i.is_empty());
            match (status.filter(|_| !ids.is_empty()), instance) {
                (Some(status), Some(instance)) => out.receipts.push(DeliveryReceipt {
                    channel: Channel::WhatsApp,
                    recipient_id: instance,
                    provider_message_ids: ids,
                    status,
                }),
                (Some(_), None) => debug!("Ignoring status callback without instanceId"),
                (None, _) => {}
            }
            return Ok(out);
        }
        if kind != "ReceivedCallback" {
            debug!(kind, "Ignoring gateway callback");
            return Ok(out);
        }

        if payload.from_me {
            out.echoes_skipped = 1;
            return Ok(out);
        }
        if payload.is_group {
            debug!("Ignoring group message from gateway");
            return Ok(out);
        }

        let recipient_id = non_empty(payload.instance_id.clone())
            .ok_or_else(|| Error::MalformedPayload("missing instanceId".to_string()))?;
        let phone = payload
            .phone
            .as_deref()
            .and_then(|p| normalize_phone(p, &self.country_code))
            .ok_or_else(|| Error::MalformedPayload("missing sender phone".to_string()))?;

        let media: Option<(MessageType, &GatewayMedia)> = [
            (MessageType::Image, payload.image.as_ref()),
            (MessageType::Audio, payload.audio.as_ref()),
            (MessageType::Video, payload.video.as_ref()),
            (MessageType::Document, payload.document.as_ref()),
        ]
        .into_iter()
        .find_map(|(t, m)| m.map(|m| (t, m)));

        let (message_type, text, attachment_url) = match media {
            Some((t, m)) => (
                t,
                non_empty(m.caption.clone()).or_else(|| {
                    non_empty(m.file_name.clone()).map(|f| format!("{} {}", t.placeholder(), f))
                }),
                m.url().map(str::to_string),
            ),
            None => (
                MessageType::Text,
                non_empty(payload.text.as_ref().and_then(|t| t.message.clone())),
                None,
            ),
        };
        let Some(content) = body_or_placeholder(text, message_type) else {
            debug!("Ignoring gateway message without content");
            return Ok(out);
        };

        out.events.push(InboundEvent {
            channel: Channel::WhatsApp,
            recipient_id,
            sender: SenderIdentity {
                channel_native_id: Some(phone.clone()),
                legacy_display_id: Some(phone),
                subscriber_platform_id: None,
                display_name: non_empty(payload.sender_name.clone())
                    .or_else(|| non_empty(payload.chat_name.clone())),
                username: None,
                profile_image_url: non_empty(payload.sender_photo.clone()),
            },
            message_type,
            content,
            attachment_url,
            provider_message_id: non_empty(payload.message_id.clone()),
            timestamp: payload
                .momment
                .and_then(from_unix_flexible)
                .unwrap_or_else(Utc::now),
        });
        Ok(out)
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::MalformedPayload(e.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Content for the store, which never accepts an empty body.
fn body_or_placeholder(text: Option<String>, message_type: MessageType) -> Option<String> {
    match text {
        Some(text) => Some(text),
        None if message_type != MessageType::Text => Some(message_type.placeholder().to_string()),
        None => None,
    }
}

fn flexible_timestamp(value: Option<&JsonValue>) -> DateTime<Utc> {
    let parsed = match value {
        Some(JsonValue::Number(n)) => n.as_i64().and_then(from_unix_flexible),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(from_unix_flexible)
            .or_else(|| from_rfc3339(s)),
        _ => None,
    };
    parsed.unwrap_or_else(Utc::now)
}

/// One event per attachment so each keeps its own dedup key. Text rides on
/// the first event.
fn meta_events(
    channel: Channel,
    item: &MetaMessaging,
    message: &MetaMessage,
    sender: String,
    page: String,
    timestamp: DateTime<Utc>,
) -> Vec<InboundEvent> {
    let identity = SenderIdentity {
        channel_native_id: Some(sender),
        ..Default::default()
    };
    let text = non_empty(message.text.clone());
    let event = |message_type, content, attachment_url, provider_message_id| InboundEvent {
        channel,
        recipient_id: page.clone(),
        sender: identity.clone(),
        message_type,
        content,
        attachment_url,
        provider_message_id,
        timestamp,
    };

    if message.attachments.is_empty() {
        return match text {
            Some(text) => vec![event(MessageType::Text, text, None, message.mid.clone())],
            None => {
                debug!(sender = ?item.sender.id, "Ignoring message without text or attachments");
                Vec::new()
            }
        };
    }

    message
        .attachments
        .iter()
        .enumerate()
        .map(|(i, attachment)| {
            let message_type = MessageType::from_attachment_tag(&attachment.kind);
            let caption = if i == 0 { text.clone() } else { None };
            let content = caption.unwrap_or_else(|| message_type.placeholder().to_string());
            let provider_message_id = match (&message.mid, i) {
                (Some(mid), 0) => Some(mid.clone()),
                (Some(mid), n) => Some(format!("{}#{}", mid, n)),
                (None, _) => None,
            };
            event(
                message_type,
                content,
                attachment.payload.as_ref().and_then(|p| p.url.clone()),
                provider_message_id,
            )
        })
        .collect()
}
