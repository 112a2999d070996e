use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;
use crate::models::conversation::Channel;
use crate::models::delivery_attempt::TransportKind;
use crate::models::message::MessageType;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMedia {
    Url(String),
    Base64 { data: String, mime_type: String },
}

/// What to send, independent of the provider that will carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundContent {
    pub message_type: MessageType,
    pub text: Option<String>,
    pub media: Option<OutboundMedia>,
    pub filename: Option<String>,
}

impl OutboundContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text,
            text: Some(body.into()),
            media: None,
            filename: None,
        }
    }

    /// Body persisted on the outbound message row.
    pub fn stored_content(&self) -> String {
        match (&self.text, &self.filename) {
            (Some(text), _) => text.clone(),
            (None, Some(filename)) if self.message_type == MessageType::Document => {
                format!("{} {}", self.message_type.placeholder(), filename)
            }
            _ => self.message_type.placeholder().to_string(),
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match &self.media {
            Some(OutboundMedia::Url(url)) => Some(url),
            _ => None,
        }
    }

    /// `data:` URI for inline payloads, the plain URL otherwise.
    pub fn media_reference(&self) -> Option<String> {
        match &self.media {
            Some(OutboundMedia::Url(url)) => Some(url.clone()),
            Some(OutboundMedia::Base64 { data, mime_type }) => {
                Some(format!("data:{};base64,{}", mime_type, data))
            }
            None => None,
        }
    }
}

/// Address handed to a transport. What `address` means depends on the
/// transport: subscriber id, channel-native id or phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub channel: Channel,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub http_status: u16,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactProfile {
    pub name: Option<String>,
    pub username: Option<String>,
    pub profile_image_url: Option<String>,
}

/// One outbound provider API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send(
        &self,
        recipient: &Recipient,
        content: &OutboundContent,
    ) -> Result<ProviderReceipt, TransportError>;
}

/// Lookup of subscriber-platform ids by channel-native id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn find_subscriber(
        &self,
        channel: Channel,
        native_id: &str,
    ) -> Result<Option<String>, TransportError>;
}

/// Public profile lookup for a channel-native id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(
        &self,
        channel: Channel,
        native_id: &str,
    ) -> Result<Option<ContactProfile>, TransportError>;
}

/// Runs a provider call under `limit`; running out of time counts as a
/// transport failure.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::timed_out()),
    }
}

pub(crate) fn reason_for_status(status: u16) -> &'static str {
    match status {
        400 | 422 => "provider rejected the message",
        401 | 403 => "provider credentials were rejected",
        404 => "recipient was not found on the provider",
        429 => "provider rate limit reached",
        500..=599 => "provider is unavailable",
        _ => "provider returned an unexpected status",
    }
}

/// Reads a provider response, turning non-2xx statuses into a
/// [`TransportError`] that keeps the raw body for the logs only.
pub(crate) async fn read_json(resp: reqwest::Response) -> Result<(u16, JsonValue), TransportError> {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    if !(200..300).contains(&status) {
        return Err(TransportError::with_status(
            status,
            reason_for_status(status),
            body,
        ));
    }
    let json = if body.trim().is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_str(&body).map_err(|_| {
            TransportError::with_status(status, "provider returned an unreadable response", body)
        })?
    };
    Ok((status, json))
}

pub(crate) fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
