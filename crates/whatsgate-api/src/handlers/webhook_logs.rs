//! Webhook delivery log handlers

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use whatsgate_common::types::WebhookOutcome;
use whatsgate_storage::WebhookLog;

use super::{api_error, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const ADMIN_SCOPE: &str = "admin";

#[derive(Debug, Deserialize)]
pub struct ListWebhookLogsQuery {
    pub outcome: Option<WebhookOutcome>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Received deliveries, newest first
pub async fn list_webhook_logs(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListWebhookLogsQuery>,
) -> ApiResult<Json<Vec<WebhookLog>>> {
    scope(&auth, ADMIN_SCOPE)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);
    let logs = state
        .store
        .webhook_logs
        .list(query.outcome, limit, offset)
        .await
        .map_err(api_error)?;
    Ok(Json(logs))
}
