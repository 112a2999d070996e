#![allow(dead_code)]

use std::env;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use uuid::Uuid;

use omnichannel_backend::{
    config::Config,
    database::{memory::MemoryMessageStore, store::MessageStore},
    error::TransportError,
    middleware::auth::Claims,
    models::{
        channel_account::ChannelAccount, conversation::Channel, delivery_attempt::TransportKind,
    },
    routes::app_router,
    services::{
        delivery_service::DeliveryTransports,
        transport::{OutboundContent, ProviderReceipt, Recipient, SubscriberDirectory, Transport},
    },
    AppState,
};

pub const JWT_SECRET: &str = "test_secret_key";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const VERIFY_TOKEN: &str = "verify_test";
pub const APP_SECRET: &str = "app_secret_test";
pub const IG_PAGE: &str = "17841400000";
pub const WA_INSTANCE: &str = "inst-1";

/// Provider stand-in that records every send and answers from a script.
pub struct ScriptedTransport {
    kind: TransportKind,
    fail_with: Option<String>,
    pub sent: Mutex<Vec<(Recipient, OutboundContent)>>,
}

impl ScriptedTransport {
    pub fn ok(kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail_with: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(kind: TransportKind, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail_with: Some(reason.to_string()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &OutboundContent,
    ) -> Result<ProviderReceipt, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.clone(), content.clone()));
        match &self.fail_with {
            Some(reason) => Err(TransportError::with_status(400, reason.clone(), "{}")),
            None => Ok(ProviderReceipt {
                http_status: 200,
                provider_message_id: Some(format!("{}-{}", self.kind.as_str(), sent.len())),
            }),
        }
    }
}

pub struct NoSubscribers;

#[async_trait]
impl SubscriberDirectory for NoSubscribers {
    async fn find_subscriber(
        &self,
        _channel: Channel,
        _native_id: &str,
    ) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

pub struct Harness {
    pub app: Router,
    pub store: Arc<dyn MessageStore>,
    pub account_id: Uuid,
    pub subscriber_platform: Arc<ScriptedTransport>,
    pub graph_send: Arc<ScriptedTransport>,
    pub gateway: Arc<ScriptedTransport>,
}

pub fn test_config() -> Config {
    env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
    env::set_var("JWT_SECRET", JWT_SECRET);
    env::set_var("WEBHOOK_SECRET", WEBHOOK_SECRET);
    env::set_var("META_VERIFY_TOKEN", VERIFY_TOKEN);
    env::set_var("META_APP_SECRET", APP_SECRET);
    env::set_var("META_PAGE_ACCESS_TOKEN", "page-token");
    env::set_var("WHATSAPP_INSTANCE_ID", WA_INSTANCE);
    env::set_var("WHATSAPP_INSTANCE_TOKEN", "instance-token");
    env::set_var("WEBHOOK_RPS", "1000");
    env::set_var("API_RPS", "1000");
    Config::from_env().expect("config")
}

pub async fn setup_app() -> Harness {
    setup_with(
        ScriptedTransport::ok(TransportKind::SubscriberPlatform),
        ScriptedTransport::ok(TransportKind::GraphSend),
        ScriptedTransport::ok(TransportKind::WhatsAppGateway),
    )
    .await
}

pub async fn setup_with(
    subscriber_platform: Arc<ScriptedTransport>,
    graph_send: Arc<ScriptedTransport>,
    gateway: Arc<ScriptedTransport>,
) -> Harness {
    let config = test_config();
    let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let account_id = Uuid::new_v4();
    for (channel, page_id) in [(Channel::Instagram, IG_PAGE), (Channel::WhatsApp, WA_INSTANCE)] {
        store
            .register_channel_account(&ChannelAccount {
                channel,
                page_id: page_id.to_string(),
                account_id,
            })
            .await
            .expect("register account");
    }

    let transports = DeliveryTransports {
        subscriber_platform: subscriber_platform.clone(),
        subscriber_directory: Arc::new(NoSubscribers),
        graph_send: graph_send.clone(),
        gateway: gateway.clone(),
    };
    let state = AppState::with_transports(&config, store.clone(), transports, None);
    let app = app_router(state, config.webhook_rps, config.api_rps);

    Harness {
        app,
        store,
        account_id,
        subscriber_platform,
        graph_send,
        gateway,
    }
}

pub fn token_for(account_id: Uuid) -> String {
    let claims = Claims {
        sub: account_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        role: Some("agent".into()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token")
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, JsonValue) {
    let resp: Response = app.clone().oneshot(req).await.expect("response");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, json)
}

pub fn manychat_request(body: &JsonValue, secret: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/webhook/manychat")
        .header("content-type", "application/json")
        .header("x-webhook-secret", secret)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed(
    method: &str,
    uri: &str,
    account_id: Uuid,
    body: Option<&JsonValue>,
) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token_for(account_id)))
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
