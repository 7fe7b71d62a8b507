//! Contact handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use whatsgate_common::types::{AccountId, PhoneNumber};
use whatsgate_storage::Contact;

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const MESSAGES_SCOPE: &str = "messages";

#[derive(Debug, Deserialize)]
pub struct ListContactsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Customers who wrote to the account, most recently seen first
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
    Query(query): Query<ListContactsQuery>,
) -> ApiResult<Json<Vec<Contact>>> {
    scope(&auth, MESSAGES_SCOPE)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);
    let contacts = state
        .store
        .contacts
        .list(account_id, limit, offset)
        .await
        .map_err(api_error)?;
    Ok(Json(contacts))
}

/// One contact by phone number
pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((account_id, phone)): Path<(AccountId, String)>,
) -> ApiResult<Json<Contact>> {
    scope(&auth, MESSAGES_SCOPE)?;

    let phone = PhoneNumber::parse(&phone).map_err(api_error)?;
    state
        .store
        .contacts
        .get(account_id, phone.as_str())
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found("contact"))
}
