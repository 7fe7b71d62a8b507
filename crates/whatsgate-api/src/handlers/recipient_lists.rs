//! Recipient list handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use whatsgate_common::types::RecipientListId;
use whatsgate_common::Error;
use whatsgate_storage::{CreateRecipientList, ListRecipient, NewRecipient, RecipientList};

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const CAMPAIGNS_SCOPE: &str = "campaigns";

/// Maximum recipients accepted in one import request
const MAX_IMPORT: usize = 10_000;

/// Import request
#[derive(Debug, Deserialize)]
pub struct AddRecipientsRequest {
    pub recipients: Vec<NewRecipient>,
}

/// Import response
#[derive(Debug, Serialize)]
pub struct AddRecipientsResponse {
    pub added: usize,
    pub recipient_count: i32,
}

/// Create an empty recipient list
pub async fn create_recipient_list(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<CreateRecipientList>,
) -> ApiResult<(StatusCode, Json<RecipientList>)> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    if input.name.trim().is_empty() {
        return Err(api_error(Error::Validation("List name is required".to_string())));
    }

    let list = state
        .store
        .recipient_lists
        .create(input)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(list)))
}

/// Get a recipient list
pub async fn get_recipient_list(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(list_id): Path<RecipientListId>,
) -> ApiResult<Json<RecipientList>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let list = state
        .store
        .recipient_lists
        .get(list_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("recipient list"))?;
    Ok(Json(list))
}

/// Recipients of a list in import order
pub async fn list_recipients(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(list_id): Path<RecipientListId>,
) -> ApiResult<Json<Vec<ListRecipient>>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let recipients = state
        .store
        .recipient_lists
        .recipients(list_id)
        .await
        .map_err(api_error)?;
    Ok(Json(recipients))
}

/// Import recipients into a list
pub async fn add_recipients(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(list_id): Path<RecipientListId>,
    Json(input): Json<AddRecipientsRequest>,
) -> ApiResult<Json<AddRecipientsResponse>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    if input.recipients.len() > MAX_IMPORT {
        return Err(api_error(Error::Validation(format!(
            "At most {} recipients per request",
            MAX_IMPORT
        ))));
    }

    let added = state
        .store
        .recipient_lists
        .add_recipients(list_id, input.recipients)
        .await
        .map_err(api_error)?;

    let list = state
        .store
        .recipient_lists
        .get(list_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("recipient list"))?;

    Ok(Json(AddRecipientsResponse {
        added,
        recipient_count: list.recipient_count,
    }))
}
