use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::conversation::Channel;
use crate::models::message::{MessageStatus, MessageType};

/// Provider-agnostic inbound message produced by the webhook normalizer.
/// Nothing past the normalizer sees raw provider JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundEvent {
    pub channel: Channel,
    /// Page, business account or gateway instance that received the message.
    pub recipient_id: String,
    pub sender: SenderIdentity,
    pub message_type: MessageType,
    /// Never empty: attachments without a body carry a bracketed placeholder.
    pub content: String,
    pub attachment_url: Option<String>,
    pub provider_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything a provider told us about who sent a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SenderIdentity {
    pub channel_native_id: Option<String>,
    pub legacy_display_id: Option<String>,
    pub subscriber_platform_id: Option<String>,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub profile_image_url: Option<String>,
}

/// Provider callback moving outbound messages to a later delivery status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReceipt {
    pub channel: Channel,
    /// Page or gateway instance the callback was addressed to.
    pub recipient_id: String,
    pub provider_message_ids: Vec<String>,
    pub status: MessageStatus,
}

/// Output of one webhook delivery after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Normalized {
    pub events: Vec<InboundEvent>,
    pub receipts: Vec<DeliveryReceipt>,
    /// Echoes of the account's own messages that were dropped.
    pub echoes_skipped: usize,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.receipts.is_empty()
    }
}
