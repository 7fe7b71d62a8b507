//! Message Dispatcher - The single outbound path to the Cloud API
//!
//! Every send is validated, admitted by the rate limiter, and executed
//! inside the account's circuit breaker before the outcome is persisted.

use crate::circuit_breaker::CircuitBreaker;
use crate::cloud_api::{CloudApiClient, OutboundContent, OutboundMessage};
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use whatsgate_common::types::{
    AccountId, CampaignId, Direction, HeaderType, MessageId, MessageStatus, PhoneNumber,
    TemplateStatus,
};
use whatsgate_common::{Error, Result};
use whatsgate_storage::models::{Account, CreateMessage};
use whatsgate_storage::Store;

/// Hours after the customer's last message during which free-form content may be sent
const SERVICE_WINDOW_HOURS: i64 = 24;

/// A request to send one message
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    /// Sending account; the default outgoing account when absent
    #[serde(default)]
    pub account_id: Option<AccountId>,
    pub to: String,
    pub content: OutboundContent,
    /// Remote id of the message being replied to
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(skip)]
    pub campaign_id: Option<CampaignId>,
}

/// Outcome of a successful send
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub remote_id: String,
    pub status: MessageStatus,
}

/// A failed send, with the id of the failed row if one was stored
#[derive(Debug)]
pub struct SendFailure {
    pub error: Error,
    pub message_id: Option<MessageId>,
}

impl From<Error> for SendFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            message_id: None,
        }
    }
}

/// Message dispatcher
pub struct Dispatcher {
    store: Store,
    client: CloudApiClient,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        store: Store,
        client: CloudApiClient,
        rate_limiter: Arc<RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            client,
            rate_limiter,
            circuit_breaker,
            metrics,
        }
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        self.circuit_breaker.clone()
    }

    pub fn client(&self) -> &CloudApiClient {
        &self.client
    }

    /// Send a message
    pub async fn send(&self, request: SendRequest) -> Result<SendReceipt> {
        self.send_tracked(request).await.map_err(|f| f.error)
    }

    /// Send a message, reporting the stored failed row on remote errors
    pub async fn send_tracked(&self, request: SendRequest) -> std::result::Result<SendReceipt, SendFailure> {
        let result = self.dispatch(request).await;
        self.metrics
            .record_send(result.as_ref().err().map(|failure| &failure.error));
        result
    }

    async fn dispatch(&self, request: SendRequest) -> std::result::Result<SendReceipt, SendFailure> {
        let account = self.resolve_account(request.account_id).await?;
        let to = PhoneNumber::parse(&request.to)?;
        request.content.validate()?;
        self.validate_content(&account, &to, &request.content).await?;

        self.rate_limiter.acquire(account.id).await?;

        let message = OutboundMessage {
            to,
            content: request.content,
            reply_to: request.reply_to,
        };

        let sent = self
            .circuit_breaker
            .call(account.id, self.client.send_message(&account, &message))
            .await;

        match sent {
            Ok(remote_id) => {
                let mut record = self.record(&account, &message, request.campaign_id, MessageStatus::Sent);
                record.remote_id = Some(remote_id.clone());
                let stored = self.store.messages.create(record).await?;
                info!(
                    account_id = %account.id,
                    message_id = %stored.id,
                    remote_id = %remote_id,
                    "Message sent"
                );
                Ok(SendReceipt {
                    message_id: stored.id,
                    remote_id,
                    status: MessageStatus::Sent,
                })
            }
            Err(error @ Error::RemoteApi { .. }) => {
                let mut record =
                    self.record(&account, &message, request.campaign_id, MessageStatus::Failed);
                if let Error::RemoteApi { code, message, .. } = &error {
                    record.error_code = *code;
                    record.error_message = Some(message.clone());
                }
                let message_id = match self.store.messages.create(record).await {
                    Ok(stored) => Some(stored.id),
                    Err(e) => {
                        warn!(account_id = %account.id, error = %e, "Failed to store failed message");
                        None
                    }
                };
                Err(SendFailure { error, message_id })
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Load the sending account, falling back to the default outgoing one
    pub async fn resolve_account(&self, account_id: Option<AccountId>) -> Result<Account> {
        let account = match account_id {
            Some(id) => self
                .store
                .accounts
                .get(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Account {}", id)))?,
            None => self
                .store
                .accounts
                .find_default_outgoing()
                .await?
                .ok_or_else(|| {
                    Error::Validation("No default outgoing account configured".to_string())
                })?,
        };

        if !account.enabled {
            return Err(Error::Validation(format!("Account {} is disabled", account.id)));
        }
        Ok(account)
    }

    async fn validate_content(
        &self,
        account: &Account,
        to: &PhoneNumber,
        content: &OutboundContent,
    ) -> Result<()> {
        if let OutboundContent::Template {
            name,
            language,
            body_params,
            header,
        } = content
        {
            let template = self
                .store
                .templates
                .find(account.id, name, language)
                .await?
                .ok_or_else(|| {
                    Error::Validation(format!("Template {} ({}) not found", name, language))
                })?;

            if template.status_enum() != TemplateStatus::Approved {
                return Err(Error::Validation(format!(
                    "Template {} is {}, not approved",
                    name, template.status
                )));
            }

            let expected = template.placeholder_count();
            if body_params.len() != expected {
                return Err(Error::Validation(format!(
                    "Template {} expects {} parameters, got {}",
                    name,
                    expected,
                    body_params.len()
                )));
            }

            let needs_media_header = matches!(
                template.header_type_enum(),
                HeaderType::Image | HeaderType::Document | HeaderType::Video
            );
            if needs_media_header && header.is_none() {
                return Err(Error::Validation(format!(
                    "Template {} needs a {} header",
                    name, template.header_type
                )));
            }
        }

        if content.is_free_form() {
            let cutoff = Utc::now() - Duration::hours(SERVICE_WINDOW_HOURS);
            let last_inbound = self
                .store
                .messages
                .last_inbound_at(account.id, to.as_str())
                .await?;
            if !last_inbound.map(|at| at >= cutoff).unwrap_or(false) {
                debug!(account_id = %account.id, to = %to, "Outside the customer service window");
                return Err(Error::Validation(format!(
                    "No message from {} in the last {} hours; use a template",
                    to, SERVICE_WINDOW_HOURS
                )));
            }
        }

        Ok(())
    }

    fn record(
        &self,
        account: &Account,
        message: &OutboundMessage,
        campaign_id: Option<CampaignId>,
        status: MessageStatus,
    ) -> CreateMessage {
        let mut record = CreateMessage::new(
            account.id,
            Direction::Outbound,
            message.to.as_str(),
            message.content.content_type(),
            status,
        );
        record.reply_to_remote_id = message.reply_to.clone();
        record.campaign_id = campaign_id;

        match &message.content {
            OutboundContent::Text { body, .. } => record.body = Some(body.clone()),
            OutboundContent::Template {
                name,
                language,
                body_params,
                ..
            } => {
                record.template_name = Some(name.clone());
                record.template_language = Some(language.clone());
                record.template_params = body_params.clone();
            }
            OutboundContent::Media {
                link,
                media_id,
                caption,
                filename,
                ..
            } => {
                record.media_link = link.clone();
                record.media_id = media_id.clone();
                record.media_filename = filename.clone();
                record.body = caption.clone();
            }
            OutboundContent::Reaction { message_id, emoji } => {
                record.body = Some(emoji.clone());
                record.reply_to_remote_id = Some(message_id.clone());
            }
            OutboundContent::Interactive { .. } => record.body = message.content.summary(),
        }
        record
    }

    /// Send a read receipt for an inbound message
    pub async fn mark_as_read(&self, account_id: AccountId, remote_id: &str) -> Result<()> {
        let account = self.resolve_account(Some(account_id)).await?;
        self.circuit_breaker
            .call(account.id, self.client.mark_as_read(&account, remote_id))
            .await?;
        self.metrics.read_receipts.inc();
        debug!(account_id = %account.id, remote_id, "Read receipt sent");
        Ok(())
    }
}
