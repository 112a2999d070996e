use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

use crate::error::{Error, Result, TransportError};
use crate::models::delivery_attempt::TransportKind;
use crate::models::message::MessageType;
use crate::services::transport::{
    json_id, read_json, OutboundContent, ProviderReceipt, Recipient, Transport,
};

/// Business messaging gateway client. Recipients are normalized phone
/// numbers.
#[derive(Clone)]
pub struct GatewayService {
    client: Client,
    instance_base: String,
    client_token: Option<String>,
}

impl GatewayService {
    pub fn new(
        api_base: &str,
        instance_id: &str,
        instance_token: &str,
        client_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build gateway client: {}", e)))?;
        Ok(Self {
            client,
            instance_base: format!(
                "{}/instances/{}/token/{}",
                api_base.trim_end_matches('/'),
                instance_id,
                instance_token
            ),
            client_token: client_token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Endpoint path and JSON body for one send.
    fn request_for(
        phone: &str,
        content: &OutboundContent,
    ) -> std::result::Result<(String, JsonValue), TransportError> {
        if content.message_type == MessageType::Text {
            let text = content.text.as_deref().unwrap_or_default();
            return Ok(("send-text".into(), json!({ "phone": phone, "message": text })));
        }
        let media = content
            .media_reference()
            .ok_or_else(|| TransportError::new("attachment is missing its media"))?;
        let caption = content.text.clone().unwrap_or_default();
        let request = match content.message_type {
            MessageType::Image => (
                "send-image".to_string(),
                json!({ "phone": phone, "image": media, "caption": caption }),
            ),
            MessageType::Video => (
                "send-video".to_string(),
                json!({ "phone": phone, "video": media, "caption": caption }),
            ),
            MessageType::Audio => (
                "send-audio".to_string(),
                json!({ "phone": phone, "audio": media }),
            ),
            _ => {
                let filename = content.filename.clone().unwrap_or_else(|| "document".into());
                let extension = filename
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_ascii_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .unwrap_or_else(|| "pdf".into());
                (
                    format!("send-document/{}", extension),
                    json!({ "phone": phone, "document": media, "fileName": filename }),
                )
            }
        };
        Ok(request)
    }
}

#[async_trait]
impl Transport for GatewayService {
    fn kind(&self) -> TransportKind {
        TransportKind::WhatsAppGateway
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &OutboundContent,
    ) -> std::result::Result<ProviderReceipt, TransportError> {
        let (path, payload) = Self::request_for(&recipient.address, content)?;
        let mut request = self
            .client
            .post(format!("{}/{}", self.instance_base, path))
            .json(&payload);
        if let Some(token) = &self.client_token {
            request = request.header("Client-Token", token);
        }

        let (status, body) = read_json(request.send().await?).await?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(TransportError::with_status(
                status,
                "gateway rejected the message",
                error.to_string(),
            ));
        }

        Ok(ProviderReceipt {
            http_status: status,
            provider_message_id: body
                .get("messageId")
                .or_else(|| body.get("id"))
                .and_then(json_id),
        })
    }
}
