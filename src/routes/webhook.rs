use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::{
    dto::webhook_dto::VerifyQuery,
    error::{Error, Result},
    services::normalizer_service::{NormalizerService, Provider},
    utils::signature::{secrets_match, verify_hub_signature},
    AppState,
};

/// Shared secrets the webhook endpoints check before touching a payload.
#[derive(Clone)]
pub struct WebhookSecrets {
    pub shared_secret: String,
    pub meta_verify_token: String,
    pub meta_app_secret: Option<String>,
}

/// Meta subscription handshake: echoes `hub.challenge` or answers 403.
pub async fn verify_meta(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String> {
    NormalizerService::verify_handshake(&query, &state.webhook_secrets.meta_verify_token)
}

pub async fn receive_meta(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>)> {
    if let Some(app_secret) = &state.webhook_secrets.meta_app_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Forbidden("missing_signature".into()))?;
        if !verify_hub_signature(&body, signature, app_secret) {
            return Err(Error::Forbidden("invalid_signature".into()));
        }
    }
    receive(&state, Provider::Meta, &body).await
}

pub async fn receive_manychat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>)> {
    verify_secret(&headers, &state.webhook_secrets.shared_secret)?;
    receive(&state, Provider::ManyChat, &body).await
}

pub async fn receive_whatsapp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>)> {
    verify_secret(&headers, &state.webhook_secrets.shared_secret)?;
    receive(&state, Provider::WhatsAppGateway, &body).await
}

async fn receive(
    state: &AppState,
    provider: Provider,
    body: &[u8],
) -> Result<(StatusCode, Json<JsonValue>)> {
    let normalized = match state.normalizer.normalize(provider, body) {
        Ok(normalized) => normalized,
        Err(Error::MalformedPayload(reason)) if provider.acks_malformed() => {
            warn!(provider = provider.as_str(), %reason, "Acknowledging malformed webhook");
            return Ok((
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": "malformed_payload" })),
            ));
        }
        Err(e) => {
            warn!(provider = provider.as_str(), error = %e, "Rejecting webhook");
            return Err(e);
        }
    };

    let report = state.message_service.ingest_batch(&normalized).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "ok", "report": report })),
    ))
}

fn verify_secret(headers: &HeaderMap, expected: &str) -> Result<()> {
    let Some(secret_hdr) = headers.get("x-webhook-secret") else {
        return Err(Error::Forbidden("missing_webhook_secret".into()));
    };
    let provided = secret_hdr
        .to_str()
        .map_err(|_| Error::Forbidden("invalid_secret_header".into()))?;
    if !expected.is_empty() && secrets_match(provided, expected) {
        Ok(())
    } else {
        Err(Error::Forbidden("invalid_webhook_secret".into()))
    }
}
