//! In-memory store implementing every repository trait
//!
//! Used by tests and by the `memory` database backend. All records live
//! behind one lock, so each repository call is atomic.

use crate::models::{
    normalize_keyword, Account, Campaign, CampaignRecipient, Contact, CreateAccount,
    CreateCampaign, CreateMessage, CreateRecipientList, KeywordReply, ListRecipient, Message,
    NewRecipient, NewWebhookLog, RecipientList, RecipientOutcome, StatusChange, Template,
    UpdateAccount, UpsertKeywordReply, UpsertTemplate, WebhookLog,
};
use crate::repository::recipient_lists::clean_import;
use crate::repository::{
    AccountRepository, CampaignRepository, ContactRepository, KeywordReplyRepository,
    MessageRepository, RecipientListRepository, TemplateRepository, WebhookLogRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use whatsgate_common::types::{
    AccountId, CampaignId, CampaignStatus, Direction, MessageId, MessageStatus, RecipientId,
    RecipientListId, RecipientState, TemplateId, TemplateStatus, WebhookOutcome,
};
use whatsgate_common::{Error, Result};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    messages: HashMap<MessageId, Message>,
    remote_ids: HashMap<String, MessageId>,
    templates: HashMap<TemplateId, Template>,
    lists: HashMap<RecipientListId, RecipientList>,
    list_recipients: Vec<ListRecipient>,
    campaigns: HashMap<CampaignId, Campaign>,
    campaign_recipients: Vec<CampaignRecipient>,
    contacts: HashMap<(AccountId, String), Contact>,
    webhook_logs: Vec<WebhookLog>,
    keyword_replies: HashMap<(AccountId, String), KeywordReply>,
}

impl Inner {
    fn insert_message(&mut self, input: CreateMessage) -> Message {
        let now = Utc::now();
        let message = Message {
            id: Uuid::now_v7(),
            account_id: input.account_id,
            direction: input.direction.as_str().to_string(),
            phone: input.phone,
            content_type: input.content_type.as_str().to_string(),
            body: input.body,
            template_name: input.template_name,
            template_language: input.template_language,
            template_params: serde_json::to_value(&input.template_params).unwrap_or_default(),
            media_id: input.media_id,
            media_link: input.media_link,
            media_filename: input.media_filename,
            remote_id: input.remote_id,
            reply_to_remote_id: input.reply_to_remote_id,
            campaign_id: input.campaign_id,
            status: input.status.as_str().to_string(),
            error_code: input.error_code,
            error_message: input.error_message,
            created_at: input.created_at,
            sent_at: (input.status == MessageStatus::Sent).then_some(now),
            delivered_at: None,
            read_at: None,
            updated_at: now,
        };
        if let Some(remote_id) = &message.remote_id {
            self.remote_ids.insert(remote_id.clone(), message.id);
        }
        self.messages.insert(message.id, message.clone());
        message
    }

    fn clear_default_outgoing(&mut self, except: Option<AccountId>) {
        for account in self.accounts.values_mut() {
            if Some(account.id) != except {
                account.is_default_outgoing = false;
            }
        }
    }

    fn set_campaign_status(&mut self, id: CampaignId, status: CampaignStatus) -> Option<Campaign> {
        let campaign = self.campaigns.get_mut(&id)?;
        let now = Utc::now();
        campaign.status = status.as_str().to_string();
        match status {
            CampaignStatus::InProgress => {
                campaign.started_at.get_or_insert(now);
                campaign.completed_at = None;
            }
            CampaignStatus::Queued => campaign.completed_at = None,
            CampaignStatus::Completed
            | CampaignStatus::PartiallyFailed
            | CampaignStatus::Stopped => campaign.completed_at = Some(now),
            CampaignStatus::Draft => {}
        }
        campaign.updated_at = now;
        Some(campaign.clone())
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create(&self, input: CreateAccount) -> Result<Account> {
        let mut inner = self.inner.write().await;
        if inner
            .accounts
            .values()
            .any(|a| a.phone_number_id == input.phone_number_id)
        {
            return Err(Error::Conflict(format!(
                "Phone number id {} already registered",
                input.phone_number_id
            )));
        }
        if input.is_default_outgoing {
            inner.clear_default_outgoing(None);
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::now_v7(),
            name: input.name,
            access_token: input.access_token,
            phone_number_id: input.phone_number_id,
            business_account_id: input.business_account_id,
            app_id: input.app_id,
            webhook_verify_token: input.webhook_verify_token,
            is_default_outgoing: input.is_default_outgoing,
            is_default_incoming: input.is_default_incoming,
            auto_read_receipt: input.auto_read_receipt,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn find_by_phone_number_id(&self, phone_number_id: &str) -> Result<Option<Account>> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.phone_number_id == phone_number_id)
            .cloned())
    }

    async fn find_default_outgoing(&self) -> Result<Option<Account>> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.is_default_outgoing && a.enabled)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> =
            self.inner.read().await.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    async fn update(&self, id: AccountId, input: UpdateAccount) -> Result<Option<Account>> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&id) {
            return Ok(None);
        }
        if input.is_default_outgoing == Some(true) {
            inner.clear_default_outgoing(Some(id));
        }

        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = input.name {
            account.name = v;
        }
        if let Some(v) = input.access_token {
            account.access_token = v;
        }
        if let Some(v) = input.phone_number_id {
            account.phone_number_id = v;
        }
        if let Some(v) = input.business_account_id {
            account.business_account_id = v;
        }
        if input.app_id.is_some() {
            account.app_id = input.app_id;
        }
        if input.webhook_verify_token.is_some() {
            account.webhook_verify_token = input.webhook_verify_token;
        }
        if let Some(v) = input.is_default_outgoing {
            account.is_default_outgoing = v;
        }
        if let Some(v) = input.is_default_incoming {
            account.is_default_incoming = v;
        }
        if let Some(v) = input.auto_read_receipt {
            account.auto_read_receipt = v;
        }
        if let Some(v) = input.enabled {
            account.enabled = v;
        }
        account.updated_at = Utc::now();
        Ok(Some(account.clone()))
    }

    async fn delete(&self, id: AccountId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let referencing = inner
            .messages
            .values()
            .filter(|m| m.account_id == id)
            .count();
        if referencing > 0 {
            return Err(Error::Conflict(format!(
                "Account {} is referenced by {} messages",
                id, referencing
            )));
        }
        if inner.campaigns.values().any(|c| c.account_id == id) {
            return Err(Error::Conflict(format!(
                "Account {} is referenced by campaigns",
                id
            )));
        }
        inner.templates.retain(|_, t| t.account_id != id);
        Ok(inner.accounts.remove(&id).is_some())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, input: CreateMessage) -> Result<Message> {
        let mut inner = self.inner.write().await;
        if let Some(remote_id) = &input.remote_id {
            if inner.remote_ids.contains_key(remote_id) {
                return Err(Error::Conflict(format!(
                    "Message with remote id {} already exists",
                    remote_id
                )));
            }
        }
        Ok(inner.insert_message(input))
    }

    async fn insert_if_absent(&self, input: CreateMessage) -> Result<Option<Message>> {
        let mut inner = self.inner.write().await;
        if let Some(remote_id) = &input.remote_id {
            if inner.remote_ids.contains_key(remote_id) {
                return Ok(None);
            }
        }
        Ok(Some(inner.insert_message(input)))
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .remote_ids
            .get(remote_id)
            .and_then(|id| inner.messages.get(id))
            .cloned())
    }

    async fn update_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        change: StatusChange,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(message) = inner.messages.get_mut(&id) else {
            return Ok(false);
        };
        if message.status != expected.as_str() {
            return Ok(false);
        }

        message.status = change.status.as_str().to_string();
        match change.status {
            MessageStatus::Sent => {
                message.sent_at.get_or_insert(change.at);
            }
            MessageStatus::Delivered => message.delivered_at = Some(change.at),
            MessageStatus::Read => message.read_at = Some(change.at),
            _ => {}
        }
        if change.error_code.is_some() {
            message.error_code = change.error_code;
        }
        if change.error_message.is_some() {
            message.error_message = change.error_message;
        }
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn last_inbound_at(
        &self,
        account_id: AccountId,
        phone: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let inbound = Direction::Inbound.as_str();
        Ok(self
            .inner
            .read()
            .await
            .messages
            .values()
            .filter(|m| m.account_id == account_id && m.phone == phone && m.direction == inbound)
            .map(|m| m.created_at)
            .max())
    }

    async fn list_by_phone(
        &self,
        account_id: AccountId,
        phone: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .inner
            .read()
            .await
            .messages
            .values()
            .filter(|m| m.account_id == account_id && m.phone == phone)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(messages
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn upsert(&self, input: UpsertTemplate) -> Result<(Template, bool)> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let variables = input
            .variables
            .as_ref()
            .map(|names| serde_json::to_value(names).unwrap_or_default());
        let sample_values = serde_json::to_value(&input.sample_values).unwrap_or_default();
        let buttons = if input.buttons.is_null() {
            serde_json::json!([])
        } else {
            input.buttons
        };

        let existing = inner.templates.values_mut().find(|t| {
            t.account_id == input.account_id
                && t.name == input.name
                && t.language == input.language
        });

        if let Some(template) = existing {
            template.category = input.category;
            template.body = input.body;
            if let Some(variables) = variables {
                template.variables = variables;
            }
            template.sample_values = sample_values;
            template.header_type = input.header_type.as_str().to_string();
            template.header_text = input.header_text;
            template.footer = input.footer;
            template.buttons = buttons;
            template.status = input.status.as_str().to_string();
            if input.remote_id.is_some() {
                template.remote_id = input.remote_id;
            }
            template.rejection_reason = input.rejection_reason;
            template.updated_at = now;
            return Ok((template.clone(), false));
        }

        let template = Template {
            id: Uuid::now_v7(),
            account_id: input.account_id,
            name: input.name,
            language: input.language,
            category: input.category,
            body: input.body,
            variables: variables.unwrap_or_else(|| serde_json::json!([])),
            sample_values,
            header_type: input.header_type.as_str().to_string(),
            header_text: input.header_text,
            footer: input.footer,
            buttons,
            status: input.status.as_str().to_string(),
            remote_id: input.remote_id,
            rejection_reason: input.rejection_reason,
            created_at: now,
            updated_at: now,
        };
        inner.templates.insert(template.id, template.clone());
        Ok((template, true))
    }

    async fn get(&self, id: TemplateId) -> Result<Option<Template>> {
        Ok(self.inner.read().await.templates.get(&id).cloned())
    }

    async fn find(
        &self,
        account_id: AccountId,
        name: &str,
        language: &str,
    ) -> Result<Option<Template>> {
        Ok(self
            .inner
            .read()
            .await
            .templates
            .values()
            .find(|t| t.account_id == account_id && t.name == name && t.language == language)
            .cloned())
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Template>> {
        let mut templates: Vec<Template> = self
            .inner
            .read()
            .await
            .templates
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        templates.sort_by(|a, b| (&a.name, &a.language).cmp(&(&b.name, &b.language)));
        Ok(templates)
    }

    async fn update_status(
        &self,
        id: TemplateId,
        status: TemplateStatus,
        reason: Option<String>,
    ) -> Result<Option<Template>> {
        let mut inner = self.inner.write().await;
        Ok(inner.templates.get_mut(&id).map(|t| {
            t.status = status.as_str().to_string();
            t.rejection_reason = reason;
            t.updated_at = Utc::now();
            t.clone()
        }))
    }
}

#[async_trait]
impl RecipientListRepository for MemoryStore {
    async fn create(&self, input: CreateRecipientList) -> Result<RecipientList> {
        let now = Utc::now();
        let list = RecipientList {
            id: Uuid::now_v7(),
            name: input.name,
            description: input.description,
            recipient_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.inner.write().await.lists.insert(list.id, list.clone());
        Ok(list)
    }

    async fn get(&self, id: RecipientListId) -> Result<Option<RecipientList>> {
        Ok(self.inner.read().await.lists.get(&id).cloned())
    }

    async fn add_recipients(
        &self,
        id: RecipientListId,
        recipients: Vec<NewRecipient>,
    ) -> Result<usize> {
        let cleaned = clean_import(recipients);
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let list = inner
            .lists
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Recipient list {}", id)))?;
        list.recipient_count += cleaned.len() as i32;
        list.updated_at = now;

        let added = cleaned.len();
        inner
            .list_recipients
            .extend(cleaned.into_iter().map(|r| ListRecipient {
                id: Uuid::now_v7(),
                list_id: id,
                phone: r.phone,
                name: r.name,
                data: r.data,
                created_at: now,
            }));
        Ok(added)
    }

    async fn recipients(&self, id: RecipientListId) -> Result<Vec<ListRecipient>> {
        Ok(self
            .inner
            .read()
            .await
            .list_recipients
            .iter()
            .filter(|r| r.list_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            account_id: input.account_id,
            name: input.name,
            template_name: input.template_name,
            template_language: input.template_language,
            text_body: input.text_body,
            variable_mode: input.variable_mode.as_str().to_string(),
            common_variables: serde_json::to_value(&input.common_variables).unwrap_or_default(),
            recipient_list_id: input.recipient_list_id,
            explicit_recipients: serde_json::to_value(&input.recipients).unwrap_or_default(),
            status: CampaignStatus::Draft.as_str().to_string(),
            total_count: 0,
            queued_count: 0,
            sent_count: 0,
            failed_count: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.inner
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.inner.read().await.campaigns.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .inner
            .read()
            .await
            .campaigns
            .values()
            .filter(|c| status.map(|s| c.status == s.as_str()).unwrap_or(true))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<Option<Campaign>> {
        Ok(self.inner.write().await.set_campaign_status(id, status))
    }

    async fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        status: CampaignStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.campaigns.get(&id) {
            Some(c) if c.status == expected.as_str() => {
                inner.set_campaign_status(id, status);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn enqueue(&self, id: CampaignId, recipients: Vec<NewRecipient>) -> Result<Campaign> {
        let mut inner = self.inner.write().await;
        if !inner.campaigns.contains_key(&id) {
            return Err(Error::NotFound(format!("Campaign {}", id)));
        }

        let now = Utc::now();
        let total = recipients.len() as i32;
        inner.campaign_recipients.retain(|r| r.campaign_id != id);
        inner
            .campaign_recipients
            .extend(recipients.into_iter().map(|r| CampaignRecipient {
                id: Uuid::now_v7(),
                campaign_id: id,
                phone: r.phone,
                name: r.name,
                data: r.data,
                state: RecipientState::Queued.as_str().to_string(),
                attempts: 0,
                last_error: None,
                retryable: false,
                message_id: None,
                updated_at: now,
            }));

        let campaign = inner
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Campaign {}", id)))?;
        campaign.status = CampaignStatus::Queued.as_str().to_string();
        campaign.total_count = total;
        campaign.queued_count = total;
        campaign.sent_count = 0;
        campaign.failed_count = 0;
        campaign.completed_at = None;
        campaign.updated_at = now;
        Ok(campaign.clone())
    }

    async fn recipients(&self, id: CampaignId) -> Result<Vec<CampaignRecipient>> {
        Ok(self
            .inner
            .read()
            .await
            .campaign_recipients
            .iter()
            .filter(|r| r.campaign_id == id)
            .cloned()
            .collect())
    }

    async fn queued_recipients(&self, id: CampaignId) -> Result<Vec<CampaignRecipient>> {
        let queued = RecipientState::Queued.as_str();
        Ok(self
            .inner
            .read()
            .await
            .campaign_recipients
            .iter()
            .filter(|r| r.campaign_id == id && r.state == queued)
            .cloned()
            .collect())
    }

    async fn record_outcome(
        &self,
        id: CampaignId,
        recipient_id: RecipientId,
        outcome: RecipientOutcome,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let queued = RecipientState::Queued.as_str();
        let Some(recipient) = inner
            .campaign_recipients
            .iter_mut()
            .find(|r| r.id == recipient_id && r.campaign_id == id && r.state == queued)
        else {
            return Ok(false);
        };

        let sent = matches!(outcome, RecipientOutcome::Sent { .. });
        recipient.attempts += 1;
        recipient.updated_at = Utc::now();
        match outcome {
            RecipientOutcome::Sent { message_id } => {
                recipient.state = RecipientState::Sent.as_str().to_string();
                recipient.message_id = Some(message_id);
                recipient.last_error = None;
                recipient.retryable = false;
            }
            RecipientOutcome::Failed {
                message_id,
                error,
                retryable,
            } => {
                recipient.state = RecipientState::Failed.as_str().to_string();
                if message_id.is_some() {
                    recipient.message_id = message_id;
                }
                recipient.last_error = Some(error);
                recipient.retryable = retryable;
            }
        }

        if let Some(campaign) = inner.campaigns.get_mut(&id) {
            campaign.queued_count -= 1;
            if sent {
                campaign.sent_count += 1;
            } else {
                campaign.failed_count += 1;
            }
            campaign.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn requeue_retryable(&self, id: CampaignId) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let failed = RecipientState::Failed.as_str();
        let mut moved = 0;
        for recipient in inner
            .campaign_recipients
            .iter_mut()
            .filter(|r| r.campaign_id == id && r.state == failed && r.retryable)
        {
            recipient.state = RecipientState::Queued.as_str().to_string();
            recipient.retryable = false;
            recipient.updated_at = Utc::now();
            moved += 1;
        }

        if moved > 0 {
            if let Some(campaign) = inner.campaigns.get_mut(&id) {
                campaign.failed_count -= moved as i32;
                campaign.queued_count += moved as i32;
                campaign.updated_at = Utc::now();
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn touch(
        &self,
        account_id: AccountId,
        phone: &str,
        profile_name: Option<&str>,
    ) -> Result<Contact> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let contact = inner
            .contacts
            .entry((account_id, phone.to_string()))
            .or_insert_with(|| Contact {
                account_id,
                phone: phone.to_string(),
                profile_name: None,
                first_seen: now,
                last_seen: now,
            });
        if let Some(name) = profile_name {
            contact.profile_name = Some(name.to_string());
        }
        contact.last_seen = now;
        Ok(contact.clone())
    }

    async fn get(&self, account_id: AccountId, phone: &str) -> Result<Option<Contact>> {
        Ok(self
            .inner
            .read()
            .await
            .contacts
            .get(&(account_id, phone.to_string()))
            .cloned())
    }

    async fn list(&self, account_id: AccountId, limit: i64, offset: i64) -> Result<Vec<Contact>> {
        let mut contacts: Vec<Contact> = self
            .inner
            .read()
            .await
            .contacts
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.phone.cmp(&b.phone)));
        Ok(contacts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl WebhookLogRepository for MemoryStore {
    async fn record(&self, input: NewWebhookLog) -> Result<WebhookLog> {
        let log = WebhookLog {
            id: Uuid::now_v7(),
            received_at: Utc::now(),
            object: input.object,
            outcome: input.outcome.as_str().to_string(),
            events: input.events,
            error: input.error,
            payload: input.payload,
        };
        self.inner.write().await.webhook_logs.push(log.clone());
        Ok(log)
    }

    async fn list(
        &self,
        outcome: Option<WebhookOutcome>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookLog>> {
        Ok(self
            .inner
            .read()
            .await
            .webhook_logs
            .iter()
            .rev()
            .filter(|log| outcome.map_or(true, |o| log.outcome == o.as_str()))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.webhook_logs.len();
        inner.webhook_logs.retain(|log| log.received_at >= cutoff);
        Ok((before - inner.webhook_logs.len()) as u64)
    }
}

#[async_trait]
impl KeywordReplyRepository for MemoryStore {
    async fn upsert(&self, input: UpsertKeywordReply) -> Result<KeywordReply> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let keyword = normalize_keyword(&input.keyword);
        let reply = inner
            .keyword_replies
            .entry((input.account_id, keyword.clone()))
            .or_insert_with(|| KeywordReply {
                id: Uuid::now_v7(),
                account_id: input.account_id,
                keyword,
                content: serde_json::Value::Null,
                enabled: true,
                created_at: now,
                updated_at: now,
            });
        reply.content = input.content;
        reply.enabled = input.enabled;
        reply.updated_at = now;
        Ok(reply.clone())
    }

    async fn find(&self, account_id: AccountId, text: &str) -> Result<Option<KeywordReply>> {
        Ok(self
            .inner
            .read()
            .await
            .keyword_replies
            .get(&(account_id, normalize_keyword(text)))
            .cloned())
    }

    async fn list(&self, account_id: AccountId) -> Result<Vec<KeywordReply>> {
        let mut replies: Vec<KeywordReply> = self
            .inner
            .read()
            .await
            .keyword_replies
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        Ok(replies)
    }

    async fn delete(&self, account_id: AccountId, keyword: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .keyword_replies
            .remove(&(account_id, normalize_keyword(keyword)))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Store;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use whatsgate_common::types::{ContentType, HeaderType};

    fn account_input(phone_number_id: &str) -> CreateAccount {
        CreateAccount {
            name: "Support".to_string(),
            access_token: "token".to_string(),
            phone_number_id: phone_number_id.to_string(),
            business_account_id: "waba-1".to_string(),
            app_id: None,
            webhook_verify_token: None,
            is_default_outgoing: false,
            is_default_incoming: false,
            auto_read_receipt: false,
            enabled: true,
        }
    }

    fn recipient(phone: &str) -> NewRecipient {
        NewRecipient {
            phone: phone.to_string(),
            name: None,
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn test_inbound_insert_is_idempotent() {
        let store = Store::memory();
        let account = store.accounts.create(account_input("100")).await.unwrap();

        let mut input = CreateMessage::new(
            account.id,
            Direction::Inbound,
            "573001234567",
            ContentType::Text,
            MessageStatus::Received,
        );
        input.remote_id = Some("wamid.A".to_string());
        input.body = Some("hola".to_string());

        assert!(store
            .messages
            .insert_if_absent(input.clone())
            .await
            .unwrap()
            .is_some());
        assert!(store.messages.insert_if_absent(input.clone()).await.unwrap().is_none());
        assert!(matches!(
            store.messages.create(input).await,
            Err(Error::Conflict(_))
        ));

        let history = store
            .messages
            .list_by_phone(account.id, "573001234567", 50, 0)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_status_update_requires_expected_status() {
        let store = Store::memory();
        let account = store.accounts.create(account_input("100")).await.unwrap();
        let mut input = CreateMessage::new(
            account.id,
            Direction::Outbound,
            "573001234567",
            ContentType::Text,
            MessageStatus::Sent,
        );
        input.remote_id = Some("wamid.B".to_string());
        let message = store.messages.create(input).await.unwrap();

        let read = StatusChange {
            status: MessageStatus::Read,
            at: Utc::now(),
            error_code: None,
            error_message: None,
        };
        assert!(store
            .messages
            .update_status(message.id, MessageStatus::Sent, read.clone())
            .await
            .unwrap());
        assert!(!store
            .messages
            .update_status(message.id, MessageStatus::Sent, read)
            .await
            .unwrap());

        let stored = store.messages.find_by_remote_id("wamid.B").await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), MessageStatus::Read);
        assert!(stored.read_at.is_some());
    }

    #[tokio::test]
    async fn test_account_delete_conflicts_with_messages() {
        let store = Store::memory();
        let account = store.accounts.create(account_input("100")).await.unwrap();
        let unused = store.accounts.create(account_input("200")).await.unwrap();
        store
            .messages
            .create(CreateMessage::new(
                account.id,
                Direction::Outbound,
                "573001234567",
                ContentType::Text,
                MessageStatus::Sent,
            ))
            .await
            .unwrap();

        assert!(matches!(
            store.accounts.delete(account.id).await,
            Err(Error::Conflict(_))
        ));
        assert!(store.accounts.delete(unused.id).await.unwrap());
        assert!(matches!(
            store.accounts.create(account_input("100")).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_single_default_outgoing_account() {
        let store = Store::memory();
        let mut first = account_input("100");
        first.is_default_outgoing = true;
        let first = store.accounts.create(first).await.unwrap();
        let second = store.accounts.create(account_input("200")).await.unwrap();

        store
            .accounts
            .update(
                second.id,
                UpdateAccount {
                    is_default_outgoing: Some(true),
                    ..UpdateAccount::default()
                },
            )
            .await
            .unwrap();

        let default = store.accounts.find_default_outgoing().await.unwrap().unwrap();
        assert_eq!(default.id, second.id);
        assert!(!store.accounts.get(first.id).await.unwrap().unwrap().is_default_outgoing);
    }

    #[tokio::test]
    async fn test_template_upsert_reports_creation() {
        let store = Store::memory();
        let account_id = Uuid::new_v4();
        let input = UpsertTemplate {
            account_id,
            name: "order_update".to_string(),
            language: "en_US".to_string(),
            category: Some("UTILITY".to_string()),
            body: "Hi {{1}}".to_string(),
            variables: Some(vec!["name".to_string()]),
            sample_values: vec!["Ana".to_string()],
            header_type: HeaderType::None,
            header_text: None,
            footer: None,
            buttons: serde_json::Value::Null,
            status: TemplateStatus::Pending,
            remote_id: Some("991".to_string()),
            rejection_reason: None,
        };

        let (created, is_new) = store.templates.upsert(input.clone()).await.unwrap();
        assert!(is_new);
        assert_eq!(created.buttons, json!([]));

        let (updated, is_new) = store
            .templates
            .upsert(UpsertTemplate {
                status: TemplateStatus::Approved,
                remote_id: None,
                variables: None,
                sample_values: vec!["Bea".to_string()],
                ..input
            })
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.variables_vec(), vec!["name".to_string()]);
        assert_eq!(updated.sample_values_vec(), vec!["Bea".to_string()]);
        assert_eq!(updated.status_enum(), TemplateStatus::Approved);
        assert_eq!(updated.remote_id.as_deref(), Some("991"));
    }

    #[tokio::test]
    async fn test_campaign_counters_stay_balanced() {
        let store = Store::memory();
        let campaign = store
            .campaigns
            .create(CreateCampaign {
                account_id: Uuid::new_v4(),
                name: "Launch".to_string(),
                template_name: None,
                template_language: None,
                text_body: Some("Hello {{name}}".to_string()),
                variable_mode: whatsgate_common::types::VariableMode::Common,
                common_variables: vec![],
                recipient_list_id: None,
                recipients: vec![],
            })
            .await
            .unwrap();

        let campaign = store
            .campaigns
            .enqueue(
                campaign.id,
                vec![recipient("111111111"), recipient("222222222"), recipient("333333333")],
            )
            .await
            .unwrap();
        assert_eq!(campaign.total_count, 3);
        assert_eq!(campaign.status_enum(), CampaignStatus::Queued);

        let queued = store.campaigns.queued_recipients(campaign.id).await.unwrap();
        assert!(store
            .campaigns
            .record_outcome(
                campaign.id,
                queued[0].id,
                RecipientOutcome::Sent {
                    message_id: Uuid::new_v4()
                }
            )
            .await
            .unwrap());
        for r in &queued[1..] {
            store
                .campaigns
                .record_outcome(
                    campaign.id,
                    r.id,
                    RecipientOutcome::Failed {
                        message_id: None,
                        error: "timeout".to_string(),
                        retryable: r.id == queued[1].id,
                    },
                )
                .await
                .unwrap();
        }
        // a second outcome for the same recipient is ignored
        assert!(!store
            .campaigns
            .record_outcome(
                campaign.id,
                queued[0].id,
                RecipientOutcome::Sent {
                    message_id: Uuid::new_v4()
                }
            )
            .await
            .unwrap());

        let c = store.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!((c.queued_count, c.sent_count, c.failed_count), (0, 1, 2));
        assert!(c.counters_balanced());

        assert_eq!(store.campaigns.requeue_retryable(campaign.id).await.unwrap(), 1);
        let c = store.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!((c.queued_count, c.sent_count, c.failed_count), (1, 1, 1));
        assert!(c.counters_balanced());
    }

    #[tokio::test]
    async fn test_campaign_compare_and_set_status() {
        let store = Store::memory();
        let campaign = store
            .campaigns
            .create(CreateCampaign {
                account_id: Uuid::new_v4(),
                name: "Launch".to_string(),
                template_name: None,
                template_language: None,
                text_body: Some("Hi".to_string()),
                variable_mode: whatsgate_common::types::VariableMode::Common,
                common_variables: vec![],
                recipient_list_id: None,
                recipients: vec![],
            })
            .await
            .unwrap();

        store
            .campaigns
            .set_status(campaign.id, CampaignStatus::Stopped)
            .await
            .unwrap();
        assert!(!store
            .campaigns
            .compare_and_set_status(campaign.id, CampaignStatus::InProgress, CampaignStatus::Completed)
            .await
            .unwrap());
        let c = store.campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(c.status_enum(), CampaignStatus::Stopped);
        assert!(c.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_recipient_list_import() {
        let store = Store::memory();
        let list = store
            .recipient_lists
            .create(CreateRecipientList {
                name: "VIP".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let added = store
            .recipient_lists
            .add_recipients(list.id, vec![recipient("+57 300 123 4567"), recipient("n/a")])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let stored = store.recipient_lists.get(list.id).await.unwrap().unwrap();
        assert_eq!(stored.recipient_count, 1);
        assert!(matches!(
            store
                .recipient_lists
                .add_recipients(Uuid::new_v4(), vec![recipient("1")])
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_contact_touch_keeps_known_profile_name() {
        let store = Store::memory();
        let account_id = Uuid::new_v4();

        let first = store
            .contacts
            .touch(account_id, "573001234567", Some("Ana"))
            .await
            .unwrap();
        let again = store
            .contacts
            .touch(account_id, "573001234567", None)
            .await
            .unwrap();
        assert_eq!(again.profile_name.as_deref(), Some("Ana"));
        assert_eq!(again.first_seen, first.first_seen);
        assert!(again.last_seen >= first.last_seen);

        store.contacts.touch(account_id, "573009999999", Some("Luis")).await.unwrap();
        let listed = store.contacts.list(account_id, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].phone, "573009999999");
        assert!(store.contacts.list(Uuid::new_v4(), 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_log_filters_and_prunes() {
        let store = Store::memory();
        for outcome in [WebhookOutcome::Processed, WebhookOutcome::Rejected, WebhookOutcome::Processed] {
            store
                .webhook_logs
                .record(NewWebhookLog {
                    object: Some("whatsapp_business_account".to_string()),
                    outcome,
                    events: 1,
                    error: None,
                    payload: "{}".to_string(),
                })
                .await
                .unwrap();
        }

        let all = store.webhook_logs.list(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        let rejected = store
            .webhook_logs
            .list(Some(WebhookOutcome::Rejected), 10, 0)
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].outcome_enum(), WebhookOutcome::Rejected);

        assert_eq!(
            store.webhook_logs.prune_before(Utc::now() - chrono::Duration::days(1)).await.unwrap(),
            0
        );
        assert_eq!(
            store.webhook_logs.prune_before(Utc::now() + chrono::Duration::seconds(1)).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_keyword_replies_match_normalised_text() {
        let store = Store::memory();
        let account_id = Uuid::new_v4();
        let input = UpsertKeywordReply {
            account_id,
            keyword: "  Hours ".to_string(),
            content: json!({"type": "text", "body": "9am to 6pm"}),
            enabled: true,
        };
        let created = store.keyword_replies.upsert(input.clone()).await.unwrap();
        assert_eq!(created.keyword, "hours");

        let replaced = store
            .keyword_replies
            .upsert(UpsertKeywordReply {
                enabled: false,
                ..input
            })
            .await
            .unwrap();
        assert_eq!(replaced.id, created.id);
        assert!(!replaced.enabled);

        assert!(store.keyword_replies.find(account_id, "HOURS").await.unwrap().is_some());
        assert!(store.keyword_replies.find(account_id, "hours please").await.unwrap().is_none());
        assert!(store.keyword_replies.delete(account_id, "Hours").await.unwrap());
        assert!(store.keyword_replies.list(account_id).await.unwrap().is_empty());
    }
}
