use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// External messaging surface a conversation lives on.
///
/// A conversation's channel never changes once messages exist against it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Direct messages reachable through the subscriber platform first.
    Instagram,
    /// Page inbox direct messages.
    Messenger,
    /// Business messaging gateway, addressed by phone number.
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Email,
    Other,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Instagram,
        Channel::Messenger,
        Channel::WhatsApp,
        Channel::Email,
        Channel::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Instagram => "instagram",
            Channel::Messenger => "messenger",
            Channel::WhatsApp => "whatsapp",
            Channel::Email => "email",
            Channel::Other => "other",
        }
    }

    /// Prefix used when synthesizing a legacy display id for channels that
    /// are not phone addressed.
    pub fn legacy_prefix(&self) -> &'static str {
        match self {
            Channel::Instagram => "ig",
            Channel::Messenger => "fb",
            Channel::WhatsApp => "wa",
            Channel::Email => "mail",
            Channel::Other => "ext",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instagram" => Ok(Channel::Instagram),
            "messenger" | "facebook" => Ok(Channel::Messenger),
            "whatsapp" => Ok(Channel::WhatsApp),
            "email" => Ok(Channel::Email),
            "other" => Ok(Channel::Other),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Conversation {
    pub id: Uuid,
    pub account_id: Uuid,
    #[sqlx(try_from = "String")]
    pub channel: Channel,
    pub channel_native_id: Option<String>,
    pub legacy_display_id: String,
    pub subscriber_platform_id: Option<String>,
    pub display_name: String,
    pub username: Option<String>,
    pub profile_image_url: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// True when no stable identifier is known yet.
    pub fn has_no_identity(&self) -> bool {
        self.channel_native_id.is_none() && self.subscriber_platform_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewConversation {
    pub account_id: Uuid,
    pub channel: Channel,
    pub channel_native_id: Option<String>,
    pub legacy_display_id: String,
    pub subscriber_platform_id: Option<String>,
    pub display_name: String,
    pub username: Option<String>,
    pub profile_image_url: Option<String>,
}

/// Identity fields learned after a conversation was created. Only fields
/// currently empty on the stored row are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityBackfill {
    pub channel_native_id: Option<String>,
    pub subscriber_platform_id: Option<String>,
    pub username: Option<String>,
    pub profile_image_url: Option<String>,
}

impl IdentityBackfill {
    pub fn is_empty(&self) -> bool {
        self.channel_native_id.is_none()
            && self.subscriber_platform_id.is_none()
            && self.username.is_none()
            && self.profile_image_url.is_none()
    }

    /// Drops fields the conversation already has, so a backfill never
    /// overwrites an established identity.
    pub fn missing_from(self, conversation: &Conversation) -> Self {
        Self {
            channel_native_id: self
                .channel_native_id
                .filter(|_| conversation.channel_native_id.is_none()),
            subscriber_platform_id: self
                .subscriber_platform_id
                .filter(|_| conversation.subscriber_platform_id.is_none()),
            username: self.username.filter(|_| conversation.username.is_none()),
            profile_image_url: self
                .profile_image_url
                .filter(|_| conversation.profile_image_url.is_none()),
        }
    }
}
