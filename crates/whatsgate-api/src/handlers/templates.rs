//! Template handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;
use whatsgate_common::types::AccountId;
use whatsgate_common::Error;
use whatsgate_core::SyncReport;
use whatsgate_storage::{Template, UpsertTemplate};

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const TEMPLATES_SCOPE: &str = "templates";

async fn ensure_account(state: &AppState, account_id: AccountId) -> ApiResult<()> {
    state
        .store
        .accounts
        .get(account_id)
        .await
        .map_err(api_error)?
        .map(|_| ())
        .ok_or_else(|| not_found("account"))
}

/// List the templates of an account
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<Vec<Template>>> {
    scope(&auth, TEMPLATES_SCOPE)?;
    ensure_account(&state, account_id).await?;

    let templates = state
        .store
        .templates
        .list_by_account(account_id)
        .await
        .map_err(api_error)?;
    Ok(Json(templates))
}

/// Create or replace a template by name and language
pub async fn upsert_template(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
    Json(mut input): Json<UpsertTemplate>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    scope(&auth, TEMPLATES_SCOPE)?;
    ensure_account(&state, account_id).await?;

    if input.name.trim().is_empty() || input.language.trim().is_empty() {
        return Err(api_error(Error::Validation(
            "Template name and language are required".to_string(),
        )));
    }
    input.account_id = account_id;

    let (template, created) = state.store.templates.upsert(input).await.map_err(api_error)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(template)))
}

/// Pull every template of the account from the Cloud API
pub async fn sync_templates(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<SyncReport>> {
    scope(&auth, TEMPLATES_SCOPE)?;

    let report = state.template_sync.sync(account_id).await.map_err(api_error)?;
    info!(
        %account_id,
        created = report.created,
        updated = report.updated,
        "Template sync requested by key '{}'", auth.key_name
    );
    Ok(Json(report))
}
