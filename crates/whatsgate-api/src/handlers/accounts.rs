//! Account handlers (admin scope)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;
use whatsgate_common::types::AccountId;
use whatsgate_common::Error;
use whatsgate_storage::{Account, CreateAccount, UpdateAccount};

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const ADMIN_SCOPE: &str = "admin";

/// List all accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Account>>> {
    scope(&auth, ADMIN_SCOPE)?;

    let accounts = state.store.accounts.list().await.map_err(api_error)?;
    Ok(Json(accounts))
}

/// Get an account by ID
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Json<Account>> {
    scope(&auth, ADMIN_SCOPE)?;

    let account = state
        .store
        .accounts
        .get(account_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("account"))?;
    Ok(Json(account))
}

/// Create an account
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<CreateAccount>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    scope(&auth, ADMIN_SCOPE)?;

    for (field, value) in [
        ("name", &input.name),
        ("access_token", &input.access_token),
        ("phone_number_id", &input.phone_number_id),
        ("business_account_id", &input.business_account_id),
    ] {
        if value.trim().is_empty() {
            return Err(api_error(Error::Validation(format!("{} is required", field))));
        }
    }

    let account = state.store.accounts.create(input).await.map_err(api_error)?;
    info!(account_id = %account.id, "Account created by key '{}'", auth.key_name);
    Ok((StatusCode::CREATED, Json(account)))
}

/// Update an account
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
    Json(input): Json<UpdateAccount>,
) -> ApiResult<Json<Account>> {
    scope(&auth, ADMIN_SCOPE)?;

    let account = state
        .store
        .accounts
        .update(account_id, input)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("account"))?;

    // Outbound state of a re-enabled or re-keyed account starts fresh
    state.dispatcher.circuit_breaker().reset(account.id).await;
    info!(account_id = %account.id, "Account updated by key '{}'", auth.key_name);
    Ok(Json(account))
}

/// Delete an account
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<StatusCode> {
    scope(&auth, ADMIN_SCOPE)?;

    if !state.store.accounts.delete(account_id).await.map_err(api_error)? {
        return Err(not_found("account"));
    }
    info!(%account_id, "Account deleted by key '{}'", auth.key_name);
    Ok(StatusCode::NO_CONTENT)
}
