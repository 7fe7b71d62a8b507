//! Keyword auto-reply handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;
use whatsgate_common::types::AccountId;
use whatsgate_common::Error;
use whatsgate_core::OutboundContent;
use whatsgate_storage::{normalize_keyword, KeywordReply, UpsertKeywordReply};

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const ADMIN_SCOPE: &str = "admin";

/// Keyword replies of an account
pub async fn list_keywords(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<Vec<KeywordReply>>> {
    scope(&auth, ADMIN_SCOPE)?;

    let replies = state
        .store
        .keyword_replies
        .list(account_id)
        .await
        .map_err(api_error)?;
    Ok(Json(replies))
}

/// Create or replace the reply for a keyword.
///
/// The content must be a valid outbound message body.
pub async fn upsert_keyword(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
    Json(mut input): Json<UpsertKeywordReply>,
) -> ApiResult<Json<KeywordReply>> {
    scope(&auth, ADMIN_SCOPE)?;

    state
        .store
        .accounts
        .get(account_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("account"))?;

    if normalize_keyword(&input.keyword).is_empty() {
        return Err(api_error(Error::Validation("keyword must not be empty".to_string())));
    }
    let content: OutboundContent = serde_json::from_value(input.content.clone())
        .map_err(|e| api_error(Error::Validation(format!("Invalid reply content: {}", e))))?;
    content.validate().map_err(api_error)?;
    input.account_id = account_id;

    let reply = state
        .store
        .keyword_replies
        .upsert(input)
        .await
        .map_err(api_error)?;
    info!(%account_id, keyword = %reply.keyword, "Keyword reply saved by key '{}'", auth.key_name);
    Ok(Json(reply))
}

/// Remove the reply for a keyword
pub async fn delete_keyword(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((account_id, keyword)): Path<(AccountId, String)>,
) -> ApiResult<StatusCode> {
    scope(&auth, ADMIN_SCOPE)?;

    if !state
        .store
        .keyword_replies
        .delete(account_id, &keyword)
        .await
        .map_err(api_error)?
    {
        return Err(not_found("keyword reply"));
    }
    Ok(StatusCode::NO_CONTENT)
}
