use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Outbound provider a delivery attempt went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Subscriber-automation platform (ManyChat).
    SubscriberPlatform,
    /// General-purpose Graph Send API, addressed by channel-native id.
    GraphSend,
    /// Business messaging gateway, addressed by phone number.
    WhatsAppGateway,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::SubscriberPlatform => "subscriber_platform",
            TransportKind::GraphSend => "graph_send",
            TransportKind::WhatsAppGateway => "whatsapp_gateway",
        }
    }
}

impl TryFrom<String> for TransportKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "subscriber_platform" => Ok(TransportKind::SubscriberPlatform),
            "graph_send" => Ok(TransportKind::GraphSend),
            "whatsapp_gateway" => Ok(TransportKind::WhatsAppGateway),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// Record of one transport tried while sending a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DeliveryAttempt {
    pub conversation_id: Uuid,
    #[sqlx(try_from = "String")]
    pub transport: TransportKind,
    pub recipient: Option<String>,
    pub http_status: Option<i32>,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
