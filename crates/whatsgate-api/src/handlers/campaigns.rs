//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use whatsgate_common::types::{CampaignId, CampaignStatus};
use whatsgate_common::Error;
use whatsgate_core::CampaignProgress;
use whatsgate_storage::{Campaign, CampaignRecipient, CreateCampaign};

use super::{api_error, not_found, scope, ApiResult};
use crate::auth::{AppState, AuthContext};

const CAMPAIGNS_SCOPE: &str = "campaigns";

/// List campaigns query parameters
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<CampaignStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Run and retry options
#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    /// Send in the request instead of in the background
    #[serde(default)]
    pub wait: bool,
}

/// Await a run spawned off the request task so a dropped connection
/// cannot cancel it halfway
async fn finish_spawned(
    campaign_id: CampaignId,
    run: tokio::task::JoinHandle<whatsgate_common::Result<Campaign>>,
) -> ApiResult<Json<Campaign>> {
    match run.await {
        Ok(result) => Ok(Json(result.map_err(api_error)?)),
        Err(e) => Err(api_error(Error::Internal(format!(
            "Campaign {} run task failed: {}",
            campaign_id, e
        )))),
    }
}

async fn load(state: &AppState, campaign_id: CampaignId) -> ApiResult<Campaign> {
    state
        .store
        .campaigns
        .get(campaign_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("campaign"))
}

/// List campaigns, newest first
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListCampaignsQuery>,
) -> ApiResult<Json<Vec<Campaign>>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    let campaigns = state
        .store
        .campaigns
        .list(query.status, limit, offset)
        .await
        .map_err(api_error)?;
    Ok(Json(campaigns))
}

/// Create a draft campaign
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(input): Json<CreateCampaign>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let campaign = state.campaigns.create(input).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// Get a campaign
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> ApiResult<Json<Campaign>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;
    Ok(Json(load(&state, campaign_id).await?))
}

/// Recipients of a campaign with their delivery state
pub async fn list_campaign_recipients(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> ApiResult<Json<Vec<CampaignRecipient>>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;
    load(&state, campaign_id).await?;

    let recipients = state
        .store
        .campaigns
        .recipients(campaign_id)
        .await
        .map_err(api_error)?;
    Ok(Json(recipients))
}

/// Resolve and persist the recipients of a draft
pub async fn enqueue_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> ApiResult<Json<Campaign>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let campaign = state.campaigns.enqueue(campaign_id).await.map_err(api_error)?;
    Ok(Json(campaign))
}

/// Start sending a campaign.
///
/// Drafts are enqueued in the request. The send itself runs in the
/// background and the queued campaign is returned with 202, unless
/// `?wait=true` asks for the finished campaign. An interrupted
/// in_progress campaign is resumed.
pub async fn run_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
    Query(query): Query<RunQuery>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    if query.wait {
        let runner = state.campaigns.clone();
        let run = tokio::spawn(async move { runner.run(campaign_id).await });
        return Ok((StatusCode::OK, finish_spawned(campaign_id, run).await?));
    }

    let mut campaign = load(&state, campaign_id).await?;
    if campaign.status_enum() == CampaignStatus::Draft {
        campaign = state.campaigns.enqueue(campaign_id).await.map_err(api_error)?;
    }
    let resumable = campaign.status_enum() == CampaignStatus::InProgress
        && !state.campaigns.is_active(campaign_id);
    if campaign.status_enum() != CampaignStatus::Queued && !resumable {
        return Err(api_error(Error::Conflict(format!(
            "Campaign {} is {}, not queued",
            campaign_id, campaign.status
        ))));
    }

    let runner = state.campaigns.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run(campaign_id).await {
            error!(%campaign_id, error = %e, "Campaign run failed");
        }
    });
    info!(%campaign_id, "Campaign run started by key '{}'", auth.key_name);
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// Requeue retryable failures and send them again
pub async fn retry_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
    Query(query): Query<RunQuery>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    if query.wait {
        let runner = state.campaigns.clone();
        let run = tokio::spawn(async move { runner.retry_failed(campaign_id).await });
        return Ok((StatusCode::OK, finish_spawned(campaign_id, run).await?));
    }

    let campaign = load(&state, campaign_id).await?;
    let resumable = campaign.status_enum() == CampaignStatus::InProgress
        && !state.campaigns.is_active(campaign_id);
    if !resumable
        && !matches!(
            campaign.status_enum(),
            CampaignStatus::PartiallyFailed | CampaignStatus::Completed
        )
    {
        return Err(api_error(Error::Conflict(format!(
            "Campaign {} is {}, only finished or interrupted campaigns can be retried",
            campaign_id, campaign.status
        ))));
    }

    let runner = state.campaigns.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.retry_failed(campaign_id).await {
            error!(%campaign_id, error = %e, "Campaign retry failed");
        }
    });
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// Stop a campaign
pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> ApiResult<Json<Campaign>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let campaign = state.campaigns.stop(campaign_id).await.map_err(api_error)?;
    info!(%campaign_id, "Campaign stopped by key '{}'", auth.key_name);
    Ok(Json(campaign))
}

/// Progress counters of a campaign
pub async fn get_campaign_progress(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(campaign_id): Path<CampaignId>,
) -> ApiResult<Json<CampaignProgress>> {
    scope(&auth, CAMPAIGNS_SCOPE)?;

    let progress = state.campaigns.progress(campaign_id).await.map_err(api_error)?;
    Ok(Json(progress))
}
