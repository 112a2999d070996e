pub mod analytics;
pub mod docs;
pub mod health;
pub mod messages;
pub mod webhook;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::middleware::{
    auth::require_bearer_auth,
    rate_limit::{new_rps_state, rps_middleware},
};
use crate::AppState;

/// Every route of the service, with auth and rate limits applied. Outer
/// layers (CORS, tracing, body limit) are added by the binary.
pub fn app_router(state: AppState, webhook_rps: u32, api_rps: u32) -> Router {
    let webhooks = Router::new()
        .route(
            "/api/webhook/meta",
            get(webhook::verify_meta).post(webhook::receive_meta),
        )
        .route("/api/webhook/manychat", post(webhook::receive_manychat))
        .route("/api/webhook/whatsapp", post(webhook::receive_whatsapp))
        .layer(from_fn_with_state(new_rps_state(webhook_rps), rps_middleware));

    let api = Router::new()
        .route("/api/messages/send", post(messages::send_message))
        .route(
            "/api/conversations/:id/messages",
            get(messages::list_messages),
        )
        .route("/api/conversations/:id/read", post(messages::mark_read))
        .route("/api/analytics/metrics", get(analytics::get_metrics))
        .layer(from_fn_with_state(state.auth.clone(), require_bearer_auth))
        .layer(from_fn_with_state(new_rps_state(api_rps), rps_middleware));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(docs::openapi_json))
        .merge(webhooks)
        .merge(api)
        .with_state(state)
}
