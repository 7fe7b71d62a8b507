//! Cloud API webhook endpoint

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use whatsgate_common::Error;
use whatsgate_core::{Effect, SendRequest};

use crate::auth::AppState;

/// Header carrying the payload signature
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Subscription handshake parameters
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Answer the subscription handshake with the challenge
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let (Some(mode), Some(token), Some(challenge)) =
        (query.mode, query.verify_token, query.challenge)
    else {
        warn!("Webhook verification request missing parameters");
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.ingestor.verify(&mode, &token, &challenge).await {
        Ok(challenge) => (StatusCode::OK, challenge).into_response(),
        Err(Error::Auth(_)) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            error!("Webhook verification failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Receive a delivery; answered with an empty 200 unless the signature check fails
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.ingestor.handle(&body, signature).await {
        Ok(ack) => {
            for effect in ack.effects {
                spawn_effect(state.clone(), effect);
            }
            StatusCode::OK
        }
        Err(Error::Auth(_)) => StatusCode::UNAUTHORIZED,
        Err(_) => StatusCode::OK,
    }
}

fn spawn_effect(state: Arc<AppState>, effect: Effect) {
    tokio::spawn(async move {
        match effect {
            Effect::MarkRead {
                account_id,
                remote_id,
            } => {
                if let Err(e) = state.dispatcher.mark_as_read(account_id, &remote_id).await {
                    warn!(%account_id, remote_id, error = %e, "Failed to send read receipt");
                }
            }
            Effect::AutoReply {
                account_id,
                to,
                keyword,
                content,
            } => {
                let request = SendRequest {
                    account_id: Some(account_id),
                    to,
                    content,
                    reply_to: None,
                    campaign_id: None,
                };
                match state.dispatcher.send(request).await {
                    Ok(receipt) => {
                        info!(%account_id, keyword, message_id = %receipt.message_id, "Keyword auto-reply sent")
                    }
                    Err(e) => warn!(%account_id, keyword, error = %e, "Keyword auto-reply failed"),
                }
            }
        }
    });
}
