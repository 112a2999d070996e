use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result, TransportError};
use crate::models::conversation::Channel;
use crate::models::delivery_attempt::TransportKind;
use crate::models::message::MessageType;
use crate::services::transport::{
    json_id, read_json, ContactProfile, OutboundContent, OutboundMedia, ProfileSource,
    ProviderReceipt, Recipient, Transport,
};

/// Graph Send API client, addressed by the channel-native id. Also serves
/// public profile lookups for inbound senders.
#[derive(Clone)]
pub struct GraphService {
    client: Client,
    api_base: String,
    api_version: String,
    access_token: String,
}

impl GraphService {
    pub fn new(
        api_base: &str,
        api_version: &str,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build Graph client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_version: api_version.trim_matches('/').to_string(),
            access_token,
        })
    }

    fn endpoint(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<Url, TransportError> {
        let raw = format!("{}/{}/{}", self.api_base, self.api_version, path);
        let mut all = params.to_vec();
        all.push(("access_token", self.access_token.as_str()));
        Url::parse_with_params(&raw, &all)
            .map_err(|e| TransportError::new(format!("invalid Graph endpoint: {}", e)))
    }

    fn message_body(content: &OutboundContent) -> std::result::Result<JsonValue, TransportError> {
        if content.message_type == MessageType::Text {
            return Ok(json!({ "text": content.text.as_deref().unwrap_or_default() }));
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
        Ok(json!({
            "attachment": { "type": kind, "payload": { "url": url, "is_reusable": true } }
        }))
    }

    fn profile_fields(channel: Channel) -> &'static str {
        match channel {
            Channel::Instagram => "name,username,profile_pic",
            _ => "first_name,last_name,profile_pic",
        }
    }

    fn parse_profile(body: &JsonValue) -> Option<ContactProfile> {
        let text = |key: &str| {
            body.get(key)
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let name = text("name").or_else(|| {
            let joined = [text("first_name"), text("last_name")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            Some(joined).filter(|s| !s.is_empty())
        });
        let profile = ContactProfile {
            name,
            username: text("username"),
            profile_image_url: text("profile_pic"),
        };
        if profile == ContactProfile::default() {
            None
        } else {
            Some(profile)
        }
    }
}

#[async_trait]
impl Transport for GraphService {
    fn kind(&self) -> TransportKind {
        TransportKind::GraphSend
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &OutboundContent,
    ) -> std::result::Result<ProviderReceipt, TransportError> {
        if self.access_token.is_empty() {
            return Err(TransportError::new("messaging API is not configured"));
        }
        let url = self.endpoint("me/messages", &[])?;
        let payload = json!({
            "recipient": { "id": recipient.address },
            "messaging_type": "RESPONSE",
            "message": Self::message_body(content)?,
        });

        let resp = self.client.post(url).json(&payload).send().await?;
        let (status, body) = read_json(resp).await?;
        let provider_message_id = body.get("message_id").and_then(json_id);
        if provider_message_id.is_none() {
            return Err(TransportError::with_status(
                status,
                "messaging API did not confirm the message",
                body.to_string(),
            ));
        }

        Ok(ProviderReceipt {
            http_status: status,
            provider_message_id,
        })
    }
}

#[async_trait]
impl ProfileSource for GraphService {
    async fn fetch_profile(
        &self,
        channel: Channel,
        native_id: &str,
    ) -> std::result::Result<Option<ContactProfile>, TransportError> {
        if self.access_token.is_empty() {
            return Ok(None);
        }
        let url = self.endpoint(native_id, &[("fields", Self::profile_fields(channel))])?;
        let resp = self.client.get(url).send().await?;
        let (_, body) = read_json(resp).await?;
        Ok(Self::parse_profile(&body))
    }
}
