//! Message handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use whatsgate_common::types::{AccountId, Direction, MessageId, PhoneNumber};
use whatsgate_common::Error;
use whatsgate_core::{SendReceipt, SendRequest};
use whatsgate_storage::Message;

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const MESSAGES_SCOPE: &str = "messages";

/// Conversation query parameters
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Account of the conversation; the default outgoing account when absent
    pub account_id: Option<AccountId>,
    pub phone: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Message list response
#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub data: Vec<Message>,
    pub has_more: bool,
}

/// Send a message
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SendRequest>,
) -> ApiResult<(StatusCode, Json<SendReceipt>)> {
    scope(&auth, MESSAGES_SCOPE)?;

    match state.dispatcher.send_tracked(request).await {
        Ok(receipt) => Ok((StatusCode::CREATED, Json(receipt))),
        Err(failure) => {
            let (status, Json(mut body)) = api_error(failure.error);
            body.message_id = failure.message_id;
            Err((status, Json(body)))
        }
    }
}

/// Get a single message
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Json<Message>> {
    scope(&auth, MESSAGES_SCOPE)?;

    let message = state
        .store
        .messages
        .get(message_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("message"))?;
    Ok(Json(message))
}

/// Conversation history with one phone number, newest first
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<MessageListResponse>> {
    scope(&auth, MESSAGES_SCOPE)?;

    let account = state
        .dispatcher
        .resolve_account(query.account_id)
        .await
        .map_err(api_error)?;
    let phone = PhoneNumber::parse(&query.phone).map_err(api_error)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let messages = state
        .store
        .messages
        .list_by_phone(account.id, phone.as_str(), limit, offset)
        .await
        .map_err(api_error)?;

    let has_more = messages.len() as i64 >= limit;
    Ok(Json(MessageListResponse {
        data: messages,
        has_more,
    }))
}

/// Send a read receipt for a stored inbound message
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<StatusCode> {
    scope(&auth, MESSAGES_SCOPE)?;

    let message = state
        .store
        .messages
        .get(message_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("message"))?;

    let remote_id = match (message.direction_enum(), message.remote_id.as_deref()) {
        (Direction::Inbound, Some(remote_id)) => remote_id,
        _ => {
            return Err(api_error(Error::Validation(
                "Only inbound messages can be marked as read".to_string(),
            )))
        }
    };

    state
        .dispatcher
        .mark_as_read(message.account_id, remote_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
