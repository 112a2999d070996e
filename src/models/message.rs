use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::conversation::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    FromContact,
    FromAccount,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::FromContact => "from_contact",
            Direction::FromAccount => "from_account",
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "from_contact" => Ok(Direction::FromContact),
            "from_account" => Ok(Direction::FromAccount),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Document,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
            MessageType::Video => "video",
        }
    }

    /// Content stored when a provider sends an attachment without a body.
    pub fn placeholder(&self) -> &'static str {
        match self {
            MessageType::Text => "",
            MessageType::Image => "[image]",
            MessageType::Audio => "[audio]",
            MessageType::Document => "[document]",
            MessageType::Video => "[video]",
        }
    }

    /// Maps a provider attachment tag onto the canonical type. Anything the
    /// providers call a "file" or do not recognise is treated as a document.
    pub fn from_attachment_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "image" | "photo" | "sticker" | "story_mention" | "gif" => MessageType::Image,
            "video" | "reel" | "ig_reel" => MessageType::Video,
            "audio" | "voice" | "ptt" => MessageType::Audio,
            _ => MessageType::Document,
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "audio" => Ok(MessageType::Audio),
            "document" | "file" => Ok(MessageType::Document),
            "video" => Ok(MessageType::Video),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

impl TryFrom<String> for MessageType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    /// Statuses an outbound message may be in before moving to `self`.
    /// Status only moves forward: sent -> delivered -> read, or sent -> failed.
    pub fn predecessors(&self) -> &'static [MessageStatus] {
        match self {
            MessageStatus::Delivered => &[MessageStatus::Sent],
            MessageStatus::Read => &[MessageStatus::Sent, MessageStatus::Delivered],
            MessageStatus::Failed => &[MessageStatus::Sent],
            MessageStatus::Sent | MessageStatus::Received => &[],
        }
    }

    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl TryFrom<String> for MessageStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "received" => Ok(MessageStatus::Received),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub account_id: Uuid,
    #[sqlx(try_from = "String")]
    pub direction: Direction,
    #[sqlx(rename = "type")]
    #[sqlx(try_from = "String")]
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub attachment_url: Option<String>,
    pub provider_message_id: Option<String>,
    pub is_automated_reply: bool,
    #[sqlx(try_from = "String")]
    pub status: MessageStatus,
    #[sqlx(try_from = "String")]
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub account_id: Uuid,
    pub direction: Direction,
    pub message_type: MessageType,
    pub content: String,
    pub attachment_url: Option<String>,
    pub provider_message_id: Option<String>,
    pub is_automated_reply: bool,
    pub status: MessageStatus,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
}
