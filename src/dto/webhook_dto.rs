use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

/// Providers send ids as JSON numbers or strings depending on the field and
/// the API version.
fn deserialize_id_flexible<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Int(i64),
        Str(String),
    }

    Ok(match Option::<IdRepr>::deserialize(deserializer)? {
        Some(IdRepr::Int(i)) => Some(i.to_string()),
        Some(IdRepr::Str(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

// --- Meta Graph webhooks (Instagram and Messenger) ---

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetaWebhook {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<MetaEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MetaEntry {
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub id: Option<String>,
    pub time: Option<i64>,
    #[serde(default)]
    pub messaging: Vec<MetaMessaging>,
}

#[derive(Debug, Deserialize)]
pub struct MetaMessaging {
    pub sender: MetaParty,
    pub recipient: MetaParty,
    pub timestamp: Option<i64>,
    pub message: Option<MetaMessage>,
    pub delivery: Option<MetaDelivery>,
    pub read: Option<MetaRead>,
}

#[derive(Debug, Deserialize)]
pub struct MetaParty {
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetaMessage {
    pub mid: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub attachments: Vec<MetaAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct MetaAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Option<MetaAttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct MetaAttachmentPayload {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetaDelivery {
    #[serde(default)]
    pub mids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetaRead {
    pub mid: Option<String>,
}

// --- Subscriber platform (ManyChat external request) ---

#[derive(Debug, Deserialize)]
pub struct ManyChatWebhook {
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub page_id: Option<String>,
    pub channel: Option<String>,
    pub subscriber: ManyChatSubscriber,
    pub message: Option<ManyChatMessage>,
    pub last_input_text: Option<String>,
    /// Unix seconds, unix milliseconds or RFC 3339.
    pub timestamp: Option<JsonValue>,
    #[serde(default)]
    pub is_echo: bool,
}

#[derive(Debug, Deserialize)]
pub struct ManyChatSubscriber {
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub id: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub ig_username: Option<String>,
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub ig_id: Option<String>,
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub psid: Option<String>,
    pub profile_pic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManyChatMessage {
    #[serde(deserialize_with = "deserialize_id_flexible", default)]
    pub id: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub url: Option<String>,
}

// --- Business messaging gateway (Z-API style callbacks) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayWebhook {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub instance_id: Option<String>,
    pub connected_phone: Option<String>,
    pub message_id: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    /// Milliseconds; the provider spells it this way.
    pub momment: Option<i64>,
    pub status: Option<String>,
    #[serde(default)]
    pub ids: Vec<String>,
    pub chat_name: Option<String>,
    pub sender_name: Option<String>,
    pub sender_photo: Option<String>,
    pub text: Option<GatewayText>,
    pub image: Option<GatewayMedia>,
    pub audio: Option<GatewayMedia>,
    pub video: Option<GatewayMedia>,
    pub document: Option<GatewayMedia>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayText {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMedia {
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub document_url: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
}

impl GatewayMedia {
    pub fn url(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or(self.audio_url.as_deref())
            .or(self.video_url.as_deref())
            .or(self.document_url.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_and_strings() {
        let sub: ManyChatSubscriber =
            serde_json::from_value(serde_json::json!({ "id": 123456, "ig_id": "1784" })).unwrap();
        assert_eq!(sub.id.as_deref(), Some("123456"));
        assert_eq!(sub.ig_id.as_deref(), Some("1784"));

        let blank: ManyChatSubscriber =
            serde_json::from_value(serde_json::json!({ "id": "  " })).unwrap();
        assert_eq!(blank.id, None);
    }
}
