use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    dto::message_dto::SendMessagePayload,
    models::{
        conversation::{Channel, Conversation},
        delivery_attempt::{DeliveryAttempt, TransportKind},
        message::{Direction, Message, MessageStatus, MessageType},
    },
    routes::{analytics, messages},
    services::{
        analytics_service::{ChannelMetrics, Metrics, MetricsTotals, PairingPolicy},
        delivery_service::DeliveryResult,
    },
};

#[derive(OpenApi)]
#[openapi(
    paths(
        messages::send_message,
        messages::list_messages,
        messages::mark_read,
        analytics::get_metrics,
    ),
    components(schemas(
        SendMessagePayload,
        DeliveryResult,
        DeliveryAttempt,
        TransportKind,
        Message,
        MessageType,
        MessageStatus,
        Direction,
        Conversation,
        Channel,
        Metrics,
        ChannelMetrics,
        MetricsTotals,
        PairingPolicy,
    )),
    modifiers(&BearerAuth),
    tags((name = "omnichannel", description = "Conversation hub API"))
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_public_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/messages/send"));
        assert!(doc.paths.paths.contains_key("/api/analytics/metrics"));
        assert!(doc.paths.paths.contains_key("/api/conversations/{id}/messages"));
    }
}
