use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::message::MessageType;
use crate::services::transport::{OutboundContent, OutboundMedia};

fn default_message_type() -> MessageType {
    MessageType::Text
}

/// Body of `POST /api/messages/send`. Exactly one of `conversation_id` and
/// `phone` addresses the recipient.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SendMessagePayload {
    pub conversation_id: Option<Uuid>,
    #[validate(length(min = 8, max = 32))]
    pub phone: Option<String>,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: MessageType,
    #[validate(length(min = 1, max = 4096))]
    pub body: Option<String>,
    pub base64: Option<String>,
    #[validate(url)]
    pub media_url: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub mime_type: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub filename: Option<String>,
    #[serde(default)]
    pub is_automated_reply: bool,
}

/// Who the caller asked to reach.
#[derive(Debug, Clone, PartialEq)]
pub enum SendTarget {
    Conversation(Uuid),
    Phone(String),
}

impl SendMessagePayload {
    pub fn target(&self) -> Result<SendTarget> {
        match (self.conversation_id, &self.phone) {
            (Some(id), None) => Ok(SendTarget::Conversation(id)),
            (None, Some(phone)) => Ok(SendTarget::Phone(phone.clone())),
            (Some(_), Some(_)) => Err(Error::BadRequest(
                "send either conversation_id or phone, not both".to_string(),
            )),
            (None, None) => Err(Error::BadRequest(
                "conversation_id or phone is required".to_string(),
            )),
        }
    }

    pub fn content(&self) -> Result<OutboundContent> {
        let text = self
            .body
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        if self.message_type == MessageType::Text {
            let text = text.ok_or_else(|| {
                Error::BadRequest("text messages need a non-empty body".to_string())
            })?;
            return Ok(OutboundContent::text(text));
        }

        let media = match (&self.base64, &self.media_url) {
            (Some(data), None) => {
                let data = strip_data_uri(data);
                STANDARD
                    .decode(data)
                    .map_err(|_| Error::BadRequest("base64 payload is not valid".to_string()))?;
                OutboundMedia::Base64 {
                    data: data.to_string(),
                    mime_type: self
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| default_mime(self.message_type).to_string()),
                }
            }
            (None, Some(url)) => OutboundMedia::Url(url.clone()),
            _ => {
                return Err(Error::BadRequest(format!(
                    "{} messages need exactly one of base64 or media_url",
                    self.message_type.as_str()
                )))
            }
        };

        Ok(OutboundContent {
            message_type: self.message_type,
            text,
            media: Some(media),
            filename: self.filename.clone(),
        })
    }
}

fn strip_data_uri(data: &str) -> &str {
    match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    }
}

fn default_mime(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Image => "image/jpeg",
        MessageType::Audio => "audio/ogg",
        MessageType::Video => "video/mp4",
        MessageType::Document | MessageType::Text => "application/pdf",
    }
}
