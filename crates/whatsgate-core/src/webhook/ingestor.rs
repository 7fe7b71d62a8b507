//! Webhook Ingestor - Applies webhook events to stored state
//!
//! Each event becomes one state transition (an inbound message stored, a
//! delivery status advanced, a template status changed) plus optional side
//! effects. Effects are returned to the caller, which runs them after the
//! delivery has been acknowledged. Every delivery, accepted or not, is
//! written to the delivery log when enabled.

use super::events::{self, InboundMessage, StatusUpdate, TemplateStatusUpdate, WebhookEvent};
use super::signature;
use crate::cloud_api::OutboundContent;
use crate::metrics::Metrics;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use whatsgate_common::config::WebhookConfig;
use whatsgate_common::types::{
    AccountId, ContentType, Direction, MessageStatus, TemplateStatus, WebhookOutcome,
};
use whatsgate_common::{Error, Result};
use whatsgate_storage::models::{Account, CreateMessage, Message, NewWebhookLog, StatusChange};
use whatsgate_storage::Store;

/// Attempts at a compare-and-set status update before giving up
const STATUS_UPDATE_ATTEMPTS: usize = 3;

/// The only subscription mode Meta uses
const SUBSCRIBE_MODE: &str = "subscribe";

/// Payload bytes kept per delivery log entry
const MAX_LOGGED_PAYLOAD: usize = 64 * 1024;

const LOG_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Work left for the caller once the delivery is acknowledged
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a read receipt for an inbound message
    MarkRead {
        account_id: AccountId,
        remote_id: String,
    },
    /// Answer an inbound text that matched a keyword
    AutoReply {
        account_id: AccountId,
        to: String,
        keyword: String,
        content: OutboundContent,
    },
}

/// Summary of one processed delivery
#[derive(Debug, Default)]
pub struct WebhookAck {
    pub stored: usize,
    pub duplicates: usize,
    pub status_updates: usize,
    pub template_updates: usize,
    pub ignored: usize,
    pub failed: usize,
    pub effects: Vec<Effect>,
}

/// Result of applying one event
#[derive(Debug)]
enum Applied {
    Stored(Vec<Effect>),
    Duplicate,
    StatusUpdated,
    TemplateUpdated,
    Ignored,
}

/// Webhook ingestor
pub struct WebhookIngestor {
    store: Store,
    config: WebhookConfig,
    metrics: Arc<Metrics>,
}

impl WebhookIngestor {
    /// Create a new ingestor
    pub fn new(store: Store, config: WebhookConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Answer the subscription handshake, returning the challenge on success
    pub async fn verify(&self, mode: &str, token: &str, challenge: &str) -> Result<String> {
        if mode != SUBSCRIBE_MODE {
            return Err(Error::Auth(format!("Unsupported hub.mode: {}", mode)));
        }

        let configured = self
            .config
            .verify_token
            .as_deref()
            .map(|expected| signature::secrets_equal(expected, token))
            .unwrap_or(false);

        let matched = configured
            || self.store.accounts.list().await?.iter().any(|account| {
                account.enabled
                    && account
                        .webhook_verify_token
                        .as_deref()
                        .map(|expected| signature::secrets_equal(expected, token))
                        .unwrap_or(false)
            });

        if matched {
            info!("Webhook subscription verified");
            Ok(challenge.to_string())
        } else {
            warn!("Webhook verification failed: token mismatch");
            Err(Error::Auth("Verify token mismatch".to_string()))
        }
    }

    /// Process one raw delivery.
    ///
    /// Fails only on a bad signature or a malformed payload; errors while
    /// applying single events are logged and counted in the ack.
    pub async fn handle(&self, raw: &[u8], signature_header: Option<&str>) -> Result<WebhookAck> {
        if let Some(secret) = self.config.app_secret.as_deref().filter(|s| !s.is_empty()) {
            if let Err(e) = signature::verify(secret, raw, signature_header) {
                self.metrics.webhook_rejected.with_label_values(&["signature"]).inc();
                warn!(error = %e, "Rejected webhook delivery");
                self.log_delivery(raw, WebhookOutcome::Rejected, 0, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        }

        let events = match events::parse(raw) {
            Ok(events) => events,
            Err(e) => {
                self.metrics.webhook_rejected.with_label_values(&["malformed"]).inc();
                warn!(error = %e, "Dropped malformed webhook delivery");
                self.log_delivery(raw, WebhookOutcome::Malformed, 0, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let event_count = events.len();
        let mut ack = WebhookAck::default();
        for event in events {
            let kind = event.kind();
            self.metrics.webhook_events.with_label_values(&[kind]).inc();

            match self.apply(event).await {
                Ok(Applied::Stored(effects)) => {
                    ack.stored += 1;
                    ack.effects.extend(effects);
                }
                Ok(Applied::Duplicate) => ack.duplicates += 1,
                Ok(Applied::StatusUpdated) => ack.status_updates += 1,
                Ok(Applied::TemplateUpdated) => ack.template_updates += 1,
                Ok(Applied::Ignored) => ack.ignored += 1,
                Err(e) => {
                    error!(kind, error = %e, "Failed to apply webhook event");
                    ack.failed += 1;
                }
            }
        }

        debug!(
            stored = ack.stored,
            duplicates = ack.duplicates,
            status_updates = ack.status_updates,
            ignored = ack.ignored,
            "Webhook delivery processed"
        );
        let error = (ack.failed > 0).then(|| format!("{} events failed to apply", ack.failed));
        self.log_delivery(raw, WebhookOutcome::Processed, event_count, error)
            .await;
        Ok(ack)
    }

    /// Append a delivery to the log; failures to do so are only logged
    async fn log_delivery(
        &self,
        raw: &[u8],
        outcome: WebhookOutcome,
        events: usize,
        error: Option<String>,
    ) {
        if !self.config.log_deliveries {
            return;
        }

        let object = serde_json::from_slice::<Value>(raw)
            .ok()
            .and_then(|v| v.get("object").and_then(Value::as_str).map(str::to_string));
        let entry = NewWebhookLog {
            object,
            outcome,
            events: events as i32,
            error,
            payload: truncated_payload(raw),
        };
        if let Err(e) = self.store.webhook_logs.record(entry).await {
            warn!(error = %e, "Failed to record webhook delivery");
        }
    }

    /// Drop delivery log entries older than the retention period
    pub async fn prune_delivery_log(&self) -> Result<u64> {
        if self.config.log_retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.log_retention_days));
        self.store.webhook_logs.prune_before(cutoff).await
    }

    /// Prune the delivery log every hour until the task is dropped
    pub async fn run_log_pruner(self: Arc<Self>) {
        if !self.config.log_deliveries || self.config.log_retention_days == 0 {
            return;
        }

        let mut ticker = interval(LOG_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            match self.prune_delivery_log().await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "Pruned webhook delivery log"),
                Err(e) => error!("Failed to prune webhook delivery log: {}", e),
            }
        }
    }

    async fn apply(&self, event: WebhookEvent) -> Result<Applied> {
        match event {
            WebhookEvent::Message {
                phone_number_id,
                message,
            } => match self.account_for(&phone_number_id).await? {
                Some(account) => self.store_inbound(&account, message).await,
                None => Ok(Applied::Ignored),
            },
            WebhookEvent::Status {
                phone_number_id,
                update,
            } => match self.account_for(&phone_number_id).await? {
                Some(account) => self.apply_status(&account, update).await,
                None => Ok(Applied::Ignored),
            },
            WebhookEvent::TemplateStatus {
                business_account_id,
                update,
            } => self.apply_template_status(&business_account_id, update).await,
        }
    }

    async fn account_for(&self, phone_number_id: &str) -> Result<Option<Account>> {
        let account = self
            .store
            .accounts
            .find_by_phone_number_id(phone_number_id)
            .await?;
        if account.is_none() {
            warn!(phone_number_id, "Webhook change for unknown phone number id");
        }
        Ok(account)
    }

    async fn store_inbound(&self, account: &Account, message: InboundMessage) -> Result<Applied> {
        let mut input = CreateMessage::new(
            account.id,
            Direction::Inbound,
            message.from,
            message.content_type,
            MessageStatus::Received,
        );
        input.remote_id = Some(message.remote_id.clone());
        input.body = message.body;
        input.media_id = message.media_id;
        input.media_filename = message.media_filename;
        input.reply_to_remote_id = message.reply_to;
        input.created_at = message.timestamp;

        let Some(stored) = self.store.messages.insert_if_absent(input).await? else {
            debug!(remote_id = %message.remote_id, "Duplicate inbound message");
            return Ok(Applied::Duplicate);
        };

        info!(
            account_id = %account.id,
            message_id = %stored.id,
            remote_id = %message.remote_id,
            content_type = %stored.content_type,
            "Inbound message stored"
        );

        if let Err(e) = self
            .store
            .contacts
            .touch(account.id, &stored.phone, message.contact_name.as_deref())
            .await
        {
            warn!(account_id = %account.id, error = %e, "Failed to update contact");
        }

        let mut effects = Vec::new();
        if account.auto_read_receipt {
            effects.push(Effect::MarkRead {
                account_id: account.id,
                remote_id: message.remote_id,
            });
        }
        if let Some(reply) = self.keyword_reply(account, &stored).await {
            effects.push(reply);
        }
        Ok(Applied::Stored(effects))
    }

    /// The configured auto-reply when an inbound text equals a keyword
    async fn keyword_reply(&self, account: &Account, stored: &Message) -> Option<Effect> {
        if !matches!(stored.content_type_enum(), ContentType::Text | ContentType::Button) {
            return None;
        }
        let text = stored.body.as_deref()?;

        let reply = match self.store.keyword_replies.find(account.id, text).await {
            Ok(Some(reply)) if reply.enabled => reply,
            Ok(_) => return None,
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Failed to look up keyword reply");
                return None;
            }
        };

        match serde_json::from_value::<OutboundContent>(reply.content) {
            Ok(content) => {
                debug!(account_id = %account.id, keyword = %reply.keyword, "Keyword matched");
                Some(Effect::AutoReply {
                    account_id: account.id,
                    to: stored.phone.clone(),
                    keyword: reply.keyword,
                    content,
                })
            }
            Err(e) => {
                warn!(keyword = %reply.keyword, error = %e, "Stored keyword reply is not valid content");
                None
            }
        }
    }

    async fn apply_status(&self, account: &Account, update: StatusUpdate) -> Result<Applied> {
        for _ in 0..STATUS_UPDATE_ATTEMPTS {
            let Some(message) = self.store.messages.find_by_remote_id(&update.remote_id).await?
            else {
                debug!(remote_id = %update.remote_id, "Status for unknown message");
                return Ok(Applied::Ignored);
            };

            if message.account_id != account.id || message.direction_enum() != Direction::Outbound {
                debug!(remote_id = %update.remote_id, "Status for message of another account");
                return Ok(Applied::Ignored);
            }

            let current = message.status_enum();
            let Some(next) = current.advance(update.status) else {
                debug!(
                    remote_id = %update.remote_id,
                    current = %current,
                    incoming = %update.status,
                    "Ignoring stale status update"
                );
                return Ok(Applied::Ignored);
            };

            let change = StatusChange {
                status: next,
                at: update.timestamp,
                error_code: update.error_code,
                error_message: update.error_title.clone(),
            };
            if self.store.messages.update_status(message.id, current, change).await? {
                info!(
                    account_id = %account.id,
                    message_id = %message.id,
                    remote_id = %update.remote_id,
                    status = %next,
                    "Message status updated"
                );
                return Ok(Applied::StatusUpdated);
            }
        }

        warn!(remote_id = %update.remote_id, "Gave up on contended status update");
        Ok(Applied::Ignored)
    }

    async fn apply_template_status(
        &self,
        business_account_id: &str,
        update: TemplateStatusUpdate,
    ) -> Result<Applied> {
        let accounts: Vec<Account> = self
            .store
            .accounts
            .list()
            .await?
            .into_iter()
            .filter(|a| a.business_account_id == business_account_id)
            .collect();

        if accounts.is_empty() {
            warn!(business_account_id, "Template update for unknown business account");
            return Ok(Applied::Ignored);
        }

        let reason = match update.status {
            TemplateStatus::Rejected => update.reason.clone(),
            _ => None,
        };

        let mut updated = false;
        for account in accounts {
            let Some(template) = self
                .store
                .templates
                .find(account.id, &update.name, &update.language)
                .await?
            else {
                continue;
            };
            self.store
                .templates
                .update_status(template.id, update.status, reason.clone())
                .await?;
            info!(
                account_id = %account.id,
                template = %update.name,
                language = %update.language,
                status = %update.status,
                "Template status updated"
            );
            updated = true;
        }

        if updated {
            Ok(Applied::TemplateUpdated)
        } else {
            debug!(template = %update.name, "Template status for unknown template");
            Ok(Applied::Ignored)
        }
    }
}

/// The delivery body as text, cut to the logged size on a char boundary
fn truncated_payload(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= MAX_LOGGED_PAYLOAD {
        return text.into_owned();
    }
    let mut end = MAX_LOGGED_PAYLOAD;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
