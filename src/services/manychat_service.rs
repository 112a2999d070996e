use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result, TransportError};
use crate::models::conversation::Channel;
use crate::models::delivery_attempt::TransportKind;
use crate::models::message::MessageType;
use crate::services::transport::{
    json_id, read_json, OutboundContent, OutboundMedia, ProviderReceipt, Recipient,
    SubscriberDirectory, Transport,
};

/// Client for the subscriber-automation platform. Sends to subscriber ids
/// and looks subscribers up by their channel-native id.
#[derive(Clone)]
pub struct ManyChatService {
    client: Client,
    api_base: String,
    api_key: Option<String>,
}

impl ManyChatService {
    pub fn new(api_base: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build ManyChat client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn api_key(&self) -> std::result::Result<&str, TransportError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| TransportError::new("subscriber platform is not configured"))
    }

    fn content_type(channel: Channel) -> &'static str {
        match channel {
            Channel::Instagram => "instagram",
            _ => "facebook",
        }
    }

    fn lookup_field(channel: Channel) -> &'static str {
        match channel {
            Channel::Instagram => "ig_id",
            _ => "psid",
        }
    }

    fn message_block(content: &OutboundContent) -> std::result::Result<JsonValue, TransportError> {
        if content.message_type == MessageType::Text {
            let text = content.text.as_deref().unwrap_or_default();
            return Ok(json!({ "type": "text", "text": text }));
        }
        let url = match &content.media {
            Some(OutboundMedia::Url(url)) => url,
            Some(OutboundMedia::Base64 { .. }) => {
                return Err(TransportError::new(
                    "inline media must be sent as a link on this channel",
                ))
            }
            None => return Err(TransportError::new("attachment is missing its media")),
        };
        let kind = match content.message_type {
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
            _ => "file",
        };
        Ok(json!({ "type": kind, "url": url }))
    }

    /// ManyChat answers 200 with `{"status":"error"}` for rejected sends.
    fn check_status(status: u16, body: &JsonValue) -> std::result::Result<(), TransportError> {
        match body.get("status").and_then(JsonValue::as_str) {
            Some("success") => Ok(()),
            _ => Err(TransportError::with_status(
                status,
                "subscriber platform rejected the message",
                body.to_string(),
            )),
        }
    }
}

#[async_trait]
impl Transport for ManyChatService {
    fn kind(&self) -> TransportKind {
        TransportKind::SubscriberPlatform
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &OutboundContent,
    ) -> std::result::Result<ProviderReceipt, TransportError> {
        let api_key = self.api_key()?;
        let mut messages = vec![Self::message_block(content)?];
        if content.message_type != MessageType::Text {
            if let Some(caption) = content.text.as_deref().filter(|c| !c.is_empty()) {
                messages.push(json!({ "type": "text", "text": caption }));
            }
        }

        let subscriber_id: JsonValue = match recipient.address.parse::<i64>() {
            Ok(n) => json!(n),
            Err(_) => json!(recipient.address),
        };
        let payload = json!({
            "subscriber_id": subscriber_id,
            "data": {
                "version": "v2",
                "content": {
                    "type": Self::content_type(recipient.channel),
                    "messages": messages,
                }
            },
            "message_tag": "ACCOUNT_UPDATE",
        });

        debug!(subscriber = %recipient.address, "Sending through subscriber platform");
        let resp = self
            .client
            .post(format!("{}/fb/sending/sendContent", self.api_base))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;
        let (status, body) = read_json(resp).await?;
        Self::check_status(status, &body)?;

        Ok(ProviderReceipt {
            http_status: status,
            provider_message_id: body
                .pointer("/data/message_id")
                .and_then(json_id),
        })
    }
}

#[async_trait]
impl SubscriberDirectory for ManyChatService {
    async fn find_subscriber(
        &self,
        channel: Channel,
        native_id: &str,
    ) -> std::result::Result<Option<String>, TransportError> {
        let api_key = self.api_key()?;
        let resp = self
            .client
            .get(format!("{}/fb/subscriber/findBySystemField", self.api_base))
            .bearer_auth(api_key)
            .query(&[(Self::lookup_field(channel), native_id)])
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        let (status, body) = read_json(resp).await?;
        Self::check_status(status, &body)?;

        let data = body.get("data").cloned().unwrap_or(JsonValue::Null);
        let found = match data {
            JsonValue::Array(items) => items.first().and_then(|s| s.get("id")).and_then(json_id),
            JsonValue::Object(_) => data.get("id").and_then(json_id),
            _ => None,
        };
        if found.is_none() {
            warn!(%channel, native_id, "No subscriber found for native id");
        }
        Ok(found)
    }
}
