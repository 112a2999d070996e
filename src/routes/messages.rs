use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::message_dto::{SendMessagePayload, SendTarget},
    error::Result,
    middleware::auth::AccountId,
    models::{conversation::Conversation, message::Message},
    services::delivery_service::DeliveryResult,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/messages/send",
    request_body = SendMessagePayload,
    responses(
        (status = 200, description = "Message delivered and recorded", body = DeliveryResult),
        (status = 400, description = "Invalid payload or unsupported channel"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Conversation not found"),
        (status = 500, description = "Every transport failed, or the message could not be recorded")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(AccountId(account_id)): Extension<AccountId>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Json<DeliveryResult>> {
    payload.validate()?;
    let content = payload.content()?;
    let result = match payload.target()? {
        SendTarget::Conversation(conversation_id) => {
            state
                .delivery_router
                .send(account_id, conversation_id, &content, payload.is_automated_reply)
                .await?
        }
        SendTarget::Phone(phone) => {
            state
                .delivery_router
                .send_to_phone(account_id, &phone, &content, payload.is_automated_reply)
                .await?
        }
    };
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Messages, oldest first", body = [Message]),
        (status = 404, description = "Conversation not found")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(AccountId(account_id)): Extension<AccountId>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>> {
    let messages = state.message_service.history(account_id, id).await?;
    Ok(Json(messages))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{id}/read",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Unread counter reset", body = Conversation),
        (status = 404, description = "Conversation not found")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(AccountId(account_id)): Extension<AccountId>,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>> {
    let conversation = state.message_service.mark_read(account_id, id).await?;
    Ok(Json(conversation))
}
