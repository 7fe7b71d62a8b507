//! Campaign Runner - Bulk sends through the dispatcher
//!
//! A campaign moves draft -> queued -> in_progress -> completed or
//! partially_failed, or to stopped at any point before it finishes. Every
//! recipient outcome moves exactly one count from queued to sent or failed,
//! so sent + failed + queued always equals the total.
//!
//! A run that ends early (process restart, aborted task, storage error)
//! leaves the campaign in_progress with its remainder queued; running it
//! again, or the poller, resumes from there.

use super::renderer::MessageRenderer;
use crate::cloud_api::OutboundContent;
use crate::dispatcher::{Dispatcher, SendRequest};
use crate::metrics::Metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use whatsgate_common::config::CampaignConfig;
use whatsgate_common::types::{
    CampaignId, CampaignStatus, PhoneNumber, RecipientId, TemplateStatus, VariableMode,
};
use whatsgate_common::{Error, Result};
use whatsgate_storage::models::{
    Campaign, CampaignRecipient, CreateCampaign, NewRecipient, RecipientOutcome, Template,
};
use whatsgate_storage::Store;

/// Campaigns picked up per poll
const POLL_BATCH: i64 = 20;

/// Progress counters of a campaign
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignProgress {
    pub sent: i32,
    pub failed: i32,
    pub queued: i32,
    pub total: i32,
    pub percent: f64,
    pub status: CampaignStatus,
}

impl From<&Campaign> for CampaignProgress {
    fn from(campaign: &Campaign) -> Self {
        let percent = if campaign.total_count > 0 {
            campaign.sent_count as f64 / campaign.total_count as f64 * 100.0
        } else {
            0.0
        };
        Self {
            sent: campaign.sent_count,
            failed: campaign.failed_count,
            queued: campaign.queued_count,
            total: campaign.total_count,
            percent,
            status: campaign.status_enum(),
        }
    }
}

/// Content shared by every send of one run
enum PreparedContent {
    Template {
        template: Template,
        mode: VariableMode,
        common: Vec<String>,
    },
    Text(String),
}

/// Campaign runner
pub struct CampaignRunner {
    store: Store,
    dispatcher: Arc<Dispatcher>,
    renderer: MessageRenderer,
    metrics: Arc<Metrics>,
    concurrency: usize,
    poll_interval_secs: u64,
    active: Arc<Mutex<HashSet<CampaignId>>>,
}

/// Marks a campaign as being run by this process until dropped
struct RunGuard {
    active: Arc<Mutex<HashSet<CampaignId>>>,
    id: CampaignId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock_active(&self.active).remove(&self.id);
    }
}

fn lock_active(active: &Mutex<HashSet<CampaignId>>) -> MutexGuard<'_, HashSet<CampaignId>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CampaignRunner {
    /// Create a new campaign runner
    pub fn new(
        store: Store,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        config: &CampaignConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            dispatcher,
            renderer: MessageRenderer::new()?,
            metrics,
            concurrency: config.concurrency.max(1),
            poll_interval_secs: config.poll_interval_secs,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Create a draft campaign
    pub async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        match (&input.template_name, &input.text_body) {
            (Some(_), None) => {
                if input.template_language.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::Validation(
                        "template_language is required for template campaigns".to_string(),
                    ));
                }
            }
            (None, Some(body)) if !body.trim().is_empty() => {}
            _ => {
                return Err(Error::Validation(
                    "A campaign needs exactly one of template_name or text_body".to_string(),
                ))
            }
        }

        self.dispatcher.resolve_account(Some(input.account_id)).await?;

        if let Some(list_id) = input.recipient_list_id {
            if self.store.recipient_lists.get(list_id).await?.is_none() {
                return Err(Error::NotFound(format!("Recipient list {}", list_id)));
            }
        }

        let campaign = self.store.campaigns.create(input).await?;
        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        Ok(campaign)
    }

    async fn load(&self, id: CampaignId) -> Result<Campaign> {
        self.store
            .campaigns
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Campaign {}", id)))
    }

    /// Resolve, deduplicate and persist the recipients of a draft campaign
    pub async fn enqueue(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        if campaign.status_enum() != CampaignStatus::Draft {
            return Err(Error::Conflict(format!(
                "Campaign {} is {}, only drafts can be enqueued",
                id, campaign.status
            )));
        }

        let mut candidates = campaign.explicit_recipients_vec();
        if candidates.is_empty() {
            if let Some(list_id) = campaign.recipient_list_id {
                candidates = self
                    .store
                    .recipient_lists
                    .recipients(list_id)
                    .await?
                    .into_iter()
                    .map(|r| NewRecipient {
                        phone: r.phone,
                        name: r.name,
                        data: r.data,
                    })
                    .collect();
            }
        }

        let recipients = dedupe(candidates, id);
        if recipients.is_empty() {
            return Err(Error::Validation(format!("Campaign {} has no recipients", id)));
        }

        let campaign = self.store.campaigns.enqueue(id, recipients).await?;
        info!(campaign_id = %id, total = campaign.total_count, "Campaign queued");
        Ok(campaign)
    }

    /// Whether this process is currently running the campaign
    pub fn is_active(&self, id: CampaignId) -> bool {
        lock_active(&self.active).contains(&id)
    }

    fn claim(&self, id: CampaignId) -> Option<RunGuard> {
        lock_active(&self.active).insert(id).then(|| RunGuard {
            active: self.active.clone(),
            id,
        })
    }

    /// Send to every queued recipient; drafts are enqueued first and
    /// in_progress campaigns nobody is running are resumed
    pub async fn run(&self, id: CampaignId) -> Result<Campaign> {
        let mut campaign = self.load(id).await?;
        if campaign.status_enum() == CampaignStatus::Draft {
            campaign = self.enqueue(id).await?;
        }
        let status = campaign.status_enum();
        if !matches!(status, CampaignStatus::Queued | CampaignStatus::InProgress) {
            return Err(Error::Conflict(format!(
                "Campaign {} is {}, not queued",
                id, campaign.status
            )));
        }

        let Some(_guard) = self.claim(id) else {
            return Err(Error::Conflict(format!("Campaign {} is already running", id)));
        };

        let content = self.prepare(&campaign).await?;

        if status == CampaignStatus::Queued
            && !self
                .store
                .campaigns
                .compare_and_set_status(id, CampaignStatus::Queued, CampaignStatus::InProgress)
                .await?
        {
            return Err(Error::Conflict(format!(
                "Campaign {} changed status before it could start",
                id
            )));
        }

        let recipients = self.store.campaigns.queued_recipients(id).await?;
        if status == CampaignStatus::InProgress {
            info!(campaign_id = %id, queued = recipients.len(), "Campaign resumed");
        } else {
            info!(campaign_id = %id, queued = recipients.len(), "Campaign started");
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut sends = JoinSet::new();

        for recipient in recipients {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(campaign_id = %id, error = %e, "Campaign semaphore closed");
                    break;
                }
            };

            match self.is_stopped(id).await {
                Ok(false) => {}
                Ok(true) => {
                    info!(campaign_id = %id, "Campaign stopped, not sending the remainder");
                    break;
                }
                Err(e) => {
                    warn!(campaign_id = %id, error = %e, "Could not read campaign status, pausing run");
                    break;
                }
            }

            let request = match self.request_for(&campaign, &content, &recipient) {
                Ok(request) => request,
                Err(e) => {
                    debug!(campaign_id = %id, phone = %recipient.phone, error = %e, "Recipient cannot be rendered");
                    let outcome = RecipientOutcome::Failed {
                        message_id: None,
                        retryable: false,
                        error: e.to_string(),
                    };
                    if let Err(e) =
                        record_outcome(&self.store, &self.metrics, id, recipient.id, outcome).await
                    {
                        error!(campaign_id = %id, error = %e, "Failed to record recipient outcome");
                    }
                    continue;
                }
            };
            let dispatcher = self.dispatcher.clone();
            let store = self.store.clone();
            let metrics = self.metrics.clone();

            sends.spawn(async move {
                let result = send_one(&dispatcher, &store, &metrics, id, recipient, request).await;
                drop(permit);
                result
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(campaign_id = %id, error = %e, "Failed to record recipient outcome"),
                Err(e) => error!(campaign_id = %id, error = %e, "Campaign send task failed"),
            }
        }

        self.finish(id).await
    }

    /// Check a campaign can be sent and load what every send shares
    async fn prepare(&self, campaign: &Campaign) -> Result<PreparedContent> {
        if let Some(body) = &campaign.text_body {
            return Ok(PreparedContent::Text(body.clone()));
        }

        let (Some(name), Some(language)) = (&campaign.template_name, &campaign.template_language)
        else {
            return Err(Error::Validation(format!(
                "Campaign {} has neither a template nor a text body",
                campaign.id
            )));
        };

        let template = self
            .store
            .templates
            .find(campaign.account_id, name, language)
            .await?
            .ok_or_else(|| Error::Validation(format!("Template {} ({}) not found", name, language)))?;
        if template.status_enum() != TemplateStatus::Approved {
            return Err(Error::Validation(format!(
                "Template {} is {}, not approved",
                name, template.status
            )));
        }

        Ok(PreparedContent::Template {
            template,
            mode: campaign.variable_mode_enum(),
            common: campaign.common_variables_vec(),
        })
    }

    fn request_for(
        &self,
        campaign: &Campaign,
        content: &PreparedContent,
        recipient: &CampaignRecipient,
    ) -> Result<SendRequest> {
        let content = match content {
            PreparedContent::Template {
                template,
                mode,
                common,
            } => OutboundContent::Template {
                name: template.name.clone(),
                language: template.language.clone(),
                body_params: self.renderer.template_params(*mode, common, template, recipient)?,
                header: None,
            },
            PreparedContent::Text(body) => OutboundContent::Text {
                body: self.renderer.render_text(body, recipient),
                preview_url: false,
            },
        };

        Ok(SendRequest {
            account_id: Some(campaign.account_id),
            to: recipient.phone.clone(),
            content,
            reply_to: None,
            campaign_id: Some(campaign.id),
        })
    }

    async fn is_stopped(&self, id: CampaignId) -> Result<bool> {
        Ok(self.load(id).await?.status_enum() == CampaignStatus::Stopped)
    }

    /// Settle the terminal status unless the campaign was stopped meanwhile
    /// or recipients are still queued
    async fn finish(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        if campaign.status_enum() != CampaignStatus::InProgress {
            return Ok(campaign);
        }
        if campaign.queued_count > 0 {
            warn!(
                campaign_id = %id,
                queued = campaign.queued_count,
                "Campaign run ended with recipients still queued"
            );
            return Ok(campaign);
        }

        let terminal = if campaign.failed_count == 0 {
            CampaignStatus::Completed
        } else {
            CampaignStatus::PartiallyFailed
        };
        self.store
            .campaigns
            .compare_and_set_status(id, CampaignStatus::InProgress, terminal)
            .await?;

        let campaign = self.load(id).await?;
        info!(
            campaign_id = %id,
            status = %campaign.status,
            sent = campaign.sent_count,
            failed = campaign.failed_count,
            queued = campaign.queued_count,
            "Campaign finished"
        );
        Ok(campaign)
    }

    /// Requeue retryable failures and run the campaign again
    pub async fn retry_failed(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        let status = campaign.status_enum();
        let resumable = status == CampaignStatus::InProgress && !self.is_active(id);
        if !resumable
            && !matches!(
                status,
                CampaignStatus::PartiallyFailed | CampaignStatus::Completed
            )
        {
            return Err(Error::Conflict(format!(
                "Campaign {} is {}, only finished or interrupted campaigns can be retried",
                id, campaign.status
            )));
        }

        let moved = self.store.campaigns.requeue_retryable(id).await?;
        if resumable {
            info!(campaign_id = %id, requeued = moved, "Retrying interrupted campaign");
            return self.run(id).await;
        }
        if moved == 0 {
            debug!(campaign_id = %id, "No retryable recipients");
            return Ok(campaign);
        }

        if !self
            .store
            .campaigns
            .compare_and_set_status(id, status, CampaignStatus::Queued)
            .await?
        {
            return Err(Error::Conflict(format!(
                "Campaign {} changed status during retry",
                id
            )));
        }

        info!(campaign_id = %id, requeued = moved, "Retrying failed recipients");
        self.run(id).await
    }

    /// Stop a campaign; recipients not yet sent stay queued
    pub async fn stop(&self, id: CampaignId) -> Result<Campaign> {
        loop {
            let campaign = self.load(id).await?;
            let status = campaign.status_enum();
            match status {
                CampaignStatus::Stopped => return Ok(campaign),
                CampaignStatus::Draft | CampaignStatus::Queued | CampaignStatus::InProgress => {
                    if self
                        .store
                        .campaigns
                        .compare_and_set_status(id, status, CampaignStatus::Stopped)
                        .await?
                    {
                        info!(campaign_id = %id, "Campaign stopped");
                        return self.load(id).await;
                    }
                }
                _ => {
                    return Err(Error::Conflict(format!(
                        "Campaign {} already finished as {}",
                        id, campaign.status
                    )))
                }
            }
        }
    }

    /// Current counters of a campaign
    pub async fn progress(&self, id: CampaignId) -> Result<CampaignProgress> {
        Ok(CampaignProgress::from(&self.load(id).await?))
    }

    /// Run every queued campaign once and resume in_progress ones this
    /// process is not running
    pub async fn run_queued(&self) -> Result<usize> {
        let mut pending = self
            .store
            .campaigns
            .list(Some(CampaignStatus::Queued), POLL_BATCH, 0)
            .await?;
        pending.extend(
            self.store
                .campaigns
                .list(Some(CampaignStatus::InProgress), POLL_BATCH, 0)
                .await?
                .into_iter()
                .filter(|c| !self.is_active(c.id)),
        );

        let mut started = 0;
        for campaign in pending {
            match self.run(campaign.id).await {
                Ok(_) => started += 1,
                Err(Error::Conflict(reason)) => debug!(campaign_id = %campaign.id, %reason, "Skipped campaign"),
                Err(e) => warn!(campaign_id = %campaign.id, error = %e, "Queued campaign failed to run"),
            }
        }
        Ok(started)
    }

    /// Poll for queued campaigns until the task is dropped
    pub async fn run_poller(self: Arc<Self>) {
        if self.poll_interval_secs == 0 {
            info!("Campaign poller disabled");
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));
        info!(
            "Campaign poller started (concurrency: {}, interval: {}s)",
            self.concurrency, self.poll_interval_secs
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_queued().await {
                error!("Error running queued campaigns: {}", e);
            }
        }
    }
}

/// Send to one recipient and record the outcome
async fn send_one(
    dispatcher: &Dispatcher,
    store: &Store,
    metrics: &Metrics,
    campaign_id: CampaignId,
    recipient: CampaignRecipient,
    request: SendRequest,
) -> Result<()> {
    let outcome = match dispatcher.send_tracked(request).await {
        Ok(receipt) => RecipientOutcome::Sent {
            message_id: receipt.message_id,
        },
        Err(failure) => {
            debug!(
                campaign_id = %campaign_id,
                phone = %recipient.phone,
                error = %failure.error,
                "Campaign send failed"
            );
            RecipientOutcome::Failed {
                message_id: failure.message_id,
                retryable: failure.error.is_transient(),
                error: failure.error.to_string(),
            }
        }
    };

    record_outcome(store, metrics, campaign_id, recipient.id, outcome).await
}

async fn record_outcome(
    store: &Store,
    metrics: &Metrics,
    campaign_id: CampaignId,
    recipient_id: RecipientId,
    outcome: RecipientOutcome,
) -> Result<()> {
    let label = match outcome {
        RecipientOutcome::Sent { .. } => "sent",
        RecipientOutcome::Failed { .. } => "failed",
    };
    if store
        .campaigns
        .record_outcome(campaign_id, recipient_id, outcome)
        .await?
    {
        metrics.campaign_recipients.with_label_values(&[label]).inc();
    }
    Ok(())
}

/// Keep the first recipient per normalised number; invalid numbers are dropped
fn dedupe(candidates: Vec<NewRecipient>, campaign_id: CampaignId) -> Vec<NewRecipient> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match PhoneNumber::parse(&candidate.phone) {
            Ok(phone) => {
                if seen.insert(phone.clone()) {
                    recipients.push(NewRecipient {
                        phone: phone.as_str().to_string(),
                        ..candidate
                    });
                }
            }
            Err(e) => warn!(campaign_id = %campaign_id, error = %e, "Skipping recipient"),
        }
    }
    recipients
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        account_input, approved_template, dispatcher, open_window, SequentialIds,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use whatsgate_storage::models::Account;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recipient(phone: &str, data: Value) -> NewRecipient {
        NewRecipient {
            phone: phone.to_string(),
            name: Some("Ana".to_string()),
            data,
        }
    }

    fn template_campaign(account: &Account, recipients: Vec<NewRecipient>) -> CreateCampaign {
        CreateCampaign {
            account_id: account.id,
            name: "October orders".to_string(),
            template_name: Some("order_update".to_string()),
            template_language: Some("en_US".to_string()),
            text_body: None,
            variable_mode: VariableMode::Unique,
            common_variables: Vec::new(),
            recipient_list_id: None,
            recipients,
        }
    }

    fn runner(store: &Store, server: &MockServer, max_calls: u32, concurrency: usize) -> Arc<CampaignRunner> {
        Arc::new(
            CampaignRunner::new(
                store.clone(),
                dispatcher(store, &server.uri(), max_calls),
                Arc::new(Metrics::new().unwrap()),
                &CampaignConfig {
                    concurrency,
                    poll_interval_secs: 0,
                },
            )
            .unwrap(),
        )
    }

    async fn mock_send(server: &MockServer, delay_ms: u64) {
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .respond_with(SequentialIds::new("wamid.C").with_delay(Duration::from_millis(delay_ms)))
            .mount(server)
            .await;
    }

    async fn setup() -> (Store, Account) {
        let store = Store::memory();
        let account = store.accounts.create(account_input("1055")).await.unwrap();
        approved_template(&store, &account, "order_update", "Hi {{1}}, order {{2}} shipped").await;
        (store, account)
    }

    #[tokio::test]
    async fn test_create_requires_exactly_one_content() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        let runner = runner(&store, &server, 10, 2);

        let mut both = template_campaign(&account, vec![]);
        both.text_body = Some("hi".to_string());
        assert!(matches!(runner.create(both).await, Err(Error::Validation(_))));

        let mut no_language = template_campaign(&account, vec![]);
        no_language.template_language = None;
        assert!(matches!(runner.create(no_language).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_and_rejects_empty() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        let runner = runner(&store, &server, 10, 2);

        let campaign = runner
            .create(template_campaign(
                &account,
                vec![
                    recipient("+57 300 123 4567", json!({})),
                    recipient("573001234567", json!({})),
                    recipient("573009999999", json!({})),
                    recipient("not-a-phone", json!({})),
                ],
            ))
            .await
            .unwrap();
        let queued = runner.enqueue(campaign.id).await.unwrap();
        assert_eq!(queued.status_enum(), CampaignStatus::Queued);
        assert_eq!(queued.total_count, 2);
        assert_eq!(queued.queued_count, 2);

        let empty = runner.create(template_campaign(&account, vec![])).await.unwrap();
        assert!(matches!(runner.enqueue(empty.id).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_run_sends_rendered_parameters_and_completes() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .and(body_partial_json(json!({
                "to": "573001234567",
                "template": {"components": [{"type": "body", "parameters": [
                    {"type": "text", "text": "Ana"},
                    {"type": "text", "text": "A-1"}
                ]}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "wamid.A"}]})))
            .expect(1)
            .mount(&server)
            .await;
        mock_send(&server, 0).await;

        let runner = runner(&store, &server, 10, 2);
        let campaign = runner
            .create(template_campaign(
                &account,
                vec![
                    recipient("573001234567", json!({"name": "Ana", "order": "A-1"})),
                    recipient("573007654321", json!({"name": "Luis", "order": "A-2"})),
                ],
            ))
            .await
            .unwrap();

        let finished = runner.run(campaign.id).await.unwrap();
        assert_eq!(finished.status_enum(), CampaignStatus::Completed);
        assert_eq!(finished.sent_count, 2);
        assert_eq!(finished.failed_count, 0);
        assert!(finished.counters_balanced());

        let progress = runner.progress(campaign.id).await.unwrap();
        assert_eq!(progress.percent, 100.0);

        let recipients = store.campaigns.recipients(campaign.id).await.unwrap();
        assert!(recipients.iter().all(|r| r.message_id.is_some()));
    }

    #[tokio::test]
    async fn test_rate_limited_recipients_are_retryable() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        mock_send(&server, 0).await;
        let runner = runner(&store, &server, 2, 1);

        let campaign = runner
            .create(template_campaign(
                &account,
                vec![
                    recipient("573000000001", json!({"name": "A", "order": "1"})),
                    recipient("573000000002", json!({"name": "B", "order": "2"})),
                    recipient("573000000003", json!({"name": "C", "order": "3"})),
                ],
            ))
            .await
            .unwrap();

        let first = runner.run(campaign.id).await.unwrap();
        assert_eq!(first.status_enum(), CampaignStatus::PartiallyFailed);
        assert_eq!((first.sent_count, first.failed_count, first.queued_count), (2, 1, 0));

        let failed: Vec<CampaignRecipient> = store
            .campaigns
            .recipients(campaign.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.state == "failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].retryable);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let retried = runner.retry_failed(campaign.id).await.unwrap();
        assert_eq!(retried.status_enum(), CampaignStatus::Completed);
        assert_eq!((retried.sent_count, retried.failed_count, retried.queued_count), (3, 0, 0));
        assert!(retried.counters_balanced());
    }

    #[tokio::test]
    async fn test_stop_keeps_remainder_queued() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        mock_send(&server, 300).await;
        let runner = runner(&store, &server, 100, 1);

        let recipients = (1..=5)
            .map(|n| recipient(&format!("57300000000{}", n), json!({"name": "X", "order": "1"})))
            .collect();
        let campaign = runner
            .create(template_campaign(&account, recipients))
            .await
            .unwrap();

        let running = {
            let runner = runner.clone();
            let id = campaign.id;
            tokio::spawn(async move { runner.run(id).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.stop(campaign.id).await.unwrap();

        let finished = running.await.unwrap().unwrap();
        assert_eq!(finished.status_enum(), CampaignStatus::Stopped);
        assert!(finished.queued_count > 0);
        assert!(finished.sent_count < 5);
        assert!(finished.counters_balanced());

        assert!(matches!(runner.run(campaign.id).await, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_missing_variable_fails_recipient_without_sending() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .and(body_partial_json(json!({"to": "573001234567"})))
            .respond_with(SequentialIds::new("wamid.V"))
            .expect(1)
            .mount(&server)
            .await;
        let runner = runner(&store, &server, 10, 2);

        let campaign = runner
            .create(template_campaign(
                &account,
                vec![
                    recipient("573001234567", json!({"order": "A-1"})),
                    recipient("573007654321", json!({"plan": "basic"})),
                ],
            ))
            .await
            .unwrap();

        let finished = runner.run(campaign.id).await.unwrap();
        assert_eq!(finished.status_enum(), CampaignStatus::PartiallyFailed);
        assert_eq!((finished.sent_count, finished.failed_count), (1, 1));
        assert!(finished.counters_balanced());

        let failed = store
            .campaigns
            .recipients(campaign.id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.state == "failed")
            .unwrap();
        assert_eq!(failed.phone, "573007654321");
        assert!(!failed.retryable);
        assert!(failed.message_id.is_none());
        assert!(failed.last_error.unwrap().contains("`order`"));

        let breaker = runner.dispatcher.circuit_breaker().snapshot(account.id).await;
        assert_eq!(breaker.total_failures, 0);
    }

    #[tokio::test]
    async fn test_interrupted_run_is_resumed() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        mock_send(&server, 300).await;
        let runner = runner(&store, &server, 100, 1);

        let recipients = (1..=5)
            .map(|n| recipient(&format!("57300000000{}", n), json!({"order": n})))
            .collect();
        let campaign = runner
            .create(template_campaign(&account, recipients))
            .await
            .unwrap();

        let running = {
            let runner = runner.clone();
            let id = campaign.id;
            tokio::spawn(async move { runner.run(id).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(runner.run(campaign.id).await, Err(Error::Conflict(_))));
        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());

        let interrupted = store.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(interrupted.status_enum(), CampaignStatus::InProgress);
        assert!(interrupted.queued_count > 0);
        assert!(!runner.is_active(campaign.id));

        assert_eq!(runner.run_queued().await.unwrap(), 1);
        let finished = runner.progress(campaign.id).await.unwrap();
        assert_eq!(finished.status, CampaignStatus::Completed);
        assert_eq!((finished.sent, finished.failed, finished.queued), (5, 0, 0));
    }

    #[tokio::test]
    async fn test_concurrent_sends_open_the_circuit_once() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(50)))
            .mount(&server)
            .await;
        let runner = runner(&store, &server, 100, 4);

        let recipients = (1..=8)
            .map(|n| recipient(&format!("57300000000{}", n), json!({"order": n})))
            .collect();
        let campaign = runner
            .create(template_campaign(&account, recipients))
            .await
            .unwrap();

        let finished = runner.run(campaign.id).await.unwrap();
        assert_eq!(finished.status_enum(), CampaignStatus::PartiallyFailed);
        assert_eq!((finished.sent_count, finished.failed_count), (0, 8));
        assert!(finished.counters_balanced());

        let breaker = runner.dispatcher.circuit_breaker().snapshot(account.id).await;
        assert_eq!(breaker.times_opened, 1);
        assert!(breaker.retry_after_ms > 0);

        let rejected = store
            .campaigns
            .recipients(campaign.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.last_error.as_deref().is_some_and(|e| e.contains("Circuit open")))
            .count();
        assert!(rejected >= 4);
    }

    #[tokio::test]
    async fn test_text_campaign_needs_service_window() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .and(body_partial_json(json!({"text": {"body": "Hola Ana, plan premium"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "wamid.T"}]})))
            .expect(1)
            .mount(&server)
            .await;
        open_window(&store, &account, "573001234567").await;
        let runner = runner(&store, &server, 10, 2);

        let campaign = runner
            .create(CreateCampaign {
                account_id: account.id,
                name: "Follow-up".to_string(),
                template_name: None,
                template_language: None,
                text_body: Some("Hola {{name}}, plan {{plan}}".to_string()),
                variable_mode: VariableMode::Common,
                common_variables: Vec::new(),
                recipient_list_id: None,
                recipients: vec![
                    recipient("573001234567", json!({"plan": "premium"})),
                    recipient("573001111111", json!({"plan": "basic"})),
                ],
            })
            .await
            .unwrap();

        let finished = runner.run(campaign.id).await.unwrap();
        assert_eq!(finished.status_enum(), CampaignStatus::PartiallyFailed);
        assert_eq!((finished.sent_count, finished.failed_count), (1, 1));

        let failed = store
            .campaigns
            .recipients(campaign.id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.state == "failed")
            .unwrap();
        assert!(!failed.retryable);

        // nothing retryable, the campaign is left as is
        let same = runner.retry_failed(campaign.id).await.unwrap();
        assert_eq!(same.status_enum(), CampaignStatus::PartiallyFailed);
    }

    #[tokio::test]
    async fn test_stop_finished_campaign_is_conflict() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        mock_send(&server, 0).await;
        let runner = runner(&store, &server, 10, 2);

        let campaign = runner
            .create(template_campaign(
                &account,
                vec![recipient("573001234567", json!({"name": "Ana", "order": "1"}))],
            ))
            .await
            .unwrap();
        runner.run(campaign.id).await.unwrap();
        assert!(matches!(runner.stop(campaign.id).await, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_run_queued_picks_up_queued_campaigns() {
        let (store, account) = setup().await;
        let server = MockServer::start().await;
        mock_send(&server, 0).await;
        let runner = runner(&store, &server, 10, 2);

        let campaign = runner
            .create(template_campaign(
                &account,
                vec![recipient("573001234567", json!({"name": "Ana", "order": "1"}))],
            ))
            .await
            .unwrap();
        runner.enqueue(campaign.id).await.unwrap();

        assert_eq!(runner.run_queued().await.unwrap(), 1);
        assert_eq!(
            runner.progress(campaign.id).await.unwrap().status,
            CampaignStatus::Completed
        );
    }
}
