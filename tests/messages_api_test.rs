mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use uuid::Uuid;

use common::*;
use omnichannel_backend::models::{conversation::Channel, delivery_attempt::TransportKind};

async fn ingest_instagram_contact(h: &Harness) -> Uuid {
    let body = json!({
        "page_id": IG_PAGE,
        "channel": "instagram",
        "subscriber": { "id": 555, "name": "Ana Souza", "ig_id": 9001 },
        "last_input_text": "Oi"
    });
    let (status, _) = send(&h.app, manychat_request(&body, WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    h.store
        .find_by_native_id(h.account_id, Channel::Instagram, "9001")
        .await
        .unwrap()
        .expect("conversation")
        .id
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let h = setup_app().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/messages/send")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "phone": "5511987654321", "body": "hi" }).to_string()))
        .unwrap();
    let (status, json) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "missing_authorization");

    let req = Request::builder()
        .uri("/api/analytics/metrics")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_falls_back_to_graph_when_subscriber_platform_fails() {
    let h = setup_with(
        ScriptedTransport::failing(TransportKind::SubscriberPlatform, "outside messaging window"),
        ScriptedTransport::ok(TransportKind::GraphSend),
        ScriptedTransport::ok(TransportKind::WhatsAppGateway),
    )
    .await;
    let conversation_id = ingest_instagram_contact(&h).await;

    let payload = json!({ "conversation_id": conversation_id, "body": "Olá!" });
    let (status, json) = send(
        &h.app,
        authed("POST", "/api/messages/send", h.account_id, Some(&payload)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transport"], "graph_send");
    assert_eq!(json["attempts"].as_array().unwrap().len(), 2);
    assert_eq!(json["attempts"][0]["error"], "outside messaging window");
    assert!(json["attempts"][1]["error"].is_null());
    assert_eq!(h.subscriber_platform.sent_count(), 1);
    assert_eq!(h.graph_send.sent_count(), 1);
    let sent = h.graph_send.sent.lock().unwrap();
    assert_eq!(sent[0].0.address, "9001");
}

#[tokio::test]
async fn exhausted_chain_reports_failure_without_storing() {
    let h = setup_with(
        ScriptedTransport::failing(TransportKind::SubscriberPlatform, "subscriber blocked"),
        ScriptedTransport::failing(TransportKind::GraphSend, "recipient unavailable"),
        ScriptedTransport::ok(TransportKind::WhatsAppGateway),
    )
    .await;
    let conversation_id = ingest_instagram_contact(&h).await;

    let payload = json!({ "conversation_id": conversation_id, "body": "Olá!" });
    let (status, json) = send(
        &h.app,
        authed("POST", "/api/messages/send", h.account_id, Some(&payload)),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("recipient unavailable"));
    let messages = h.store.list_messages(conversation_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(h.store.list_attempts(conversation_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn foreign_conversation_is_not_found() {
    let h = setup_app().await;
    let conversation_id = ingest_instagram_contact(&h).await;
    let stranger = Uuid::new_v4();

    let payload = json!({ "conversation_id": conversation_id, "body": "hello" });
    let (status, _) = send(
        &h.app,
        authed("POST", "/api/messages/send", stranger, Some(&payload)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &h.app,
        authed(
            "GET",
            &format!("/api/conversations/{}/messages", conversation_id),
            stranger,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.subscriber_platform.sent_count(), 0);
}

#[tokio::test]
async fn send_to_phone_opens_whatsapp_conversation() {
    let h = setup_app().await;

    let payload = json!({
        "phone": "(11) 98765-4321",
        "body": "Seu pedido saiu",
        "is_automated_reply": true
    });
    let (status, json) = send(
        &h.app,
        authed("POST", "/api/messages/send", h.account_id, Some(&payload)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transport"], "whatsapp_gateway");
    assert_eq!(json["message"]["is_automated_reply"], true);
    let sent = h.gateway.sent.lock().unwrap();
    assert_eq!(sent[0].0.address, "5511987654321");
}

#[tokio::test]
async fn invalid_payloads_are_bad_requests() {
    let h = setup_app().await;

    for payload in [
        json!({ "body": "nobody to send to" }),
        json!({ "conversation_id": Uuid::new_v4(), "phone": "5511987654321", "body": "x" }),
        json!({ "phone": "5511987654321", "body": "   " }),
        json!({ "phone": "5511987654321", "type": "image", "media_url": "not a url" }),
    ] {
        let (status, _) = send(
            &h.app,
            authed("POST", "/api/messages/send", h.account_id, Some(&payload)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload {}", payload);
    }
}

#[tokio::test]
async fn mark_read_resets_unread_counter() {
    let h = setup_app().await;
    let conversation_id = ingest_instagram_contact(&h).await;

    let (status, json) = send(
        &h.app,
        authed(
            "POST",
            &format!("/api/conversations/{}/read", conversation_id),
            h.account_id,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["unread_count"], 0);
}
