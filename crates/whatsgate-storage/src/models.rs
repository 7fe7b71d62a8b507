//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use whatsgate_common::types::{
    AccountId, CampaignId, CampaignStatus, ContentType, Direction, HeaderType, MessageId,
    MessageStatus, RecipientId, RecipientListId, RecipientState, TemplateId, TemplateStatus,
    VariableMode, WebhookOutcome,
};

/// WhatsApp Business account model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub phone_number_id: String,
    pub business_account_id: String,
    pub app_id: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_verify_token: Option<String>,
    pub is_default_outgoing: bool,
    pub is_default_incoming: bool,
    pub auto_read_receipt: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an account
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub business_account_id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub webhook_verify_token: Option<String>,
    #[serde(default)]
    pub is_default_outgoing: bool,
    #[serde(default)]
    pub is_default_incoming: bool,
    #[serde(default)]
    pub auto_read_receipt: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Input for updating an account
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccount {
    pub name: Option<String>,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub business_account_id: Option<String>,
    pub app_id: Option<String>,
    pub webhook_verify_token: Option<String>,
    pub is_default_outgoing: Option<bool>,
    pub is_default_incoming: Option<bool>,
    pub auto_read_receipt: Option<bool>,
    pub enabled: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Message model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub account_id: AccountId,
    pub direction: String,
    pub phone: String,
    pub content_type: String,
    pub body: Option<String>,
    pub template_name: Option<String>,
    pub template_language: Option<String>,
    pub template_params: serde_json::Value,
    pub media_id: Option<String>,
    pub media_link: Option<String>,
    pub media_filename: Option<String>,
    pub remote_id: Option<String>,
    pub reply_to_remote_id: Option<String>,
    pub campaign_id: Option<CampaignId>,
    pub status: String,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Get direction as enum
    pub fn direction_enum(&self) -> Direction {
        self.direction.parse().unwrap_or(Direction::Outbound)
    }

    /// Get delivery status as enum
    pub fn status_enum(&self) -> MessageStatus {
        self.status.parse().unwrap_or(MessageStatus::Queued)
    }

    /// Get content type as enum
    pub fn content_type_enum(&self) -> ContentType {
        self.content_type.parse().unwrap_or(ContentType::Unsupported)
    }
}

/// Input for storing a message
#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub account_id: AccountId,
    pub direction: Direction,
    pub phone: String,
    pub content_type: ContentType,
    pub body: Option<String>,
    pub template_name: Option<String>,
    pub template_language: Option<String>,
    pub template_params: Vec<String>,
    pub media_id: Option<String>,
    pub media_link: Option<String>,
    pub media_filename: Option<String>,
    pub remote_id: Option<String>,
    pub reply_to_remote_id: Option<String>,
    pub campaign_id: Option<CampaignId>,
    pub status: MessageStatus,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    /// Creation time; inbound messages carry the sender's timestamp
    pub created_at: DateTime<Utc>,
}

impl CreateMessage {
    /// A new message with no content set yet
    pub fn new(
        account_id: AccountId,
        direction: Direction,
        phone: impl Into<String>,
        content_type: ContentType,
        status: MessageStatus,
    ) -> Self {
        Self {
            account_id,
            direction,
            phone: phone.into(),
            content_type,
            body: None,
            template_name: None,
            template_language: None,
            template_params: Vec::new(),
            media_id: None,
            media_link: None,
            media_filename: None,
            remote_id: None,
            reply_to_remote_id: None,
            campaign_id: None,
            status,
            error_code: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

/// A delivery status transition to persist
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: MessageStatus,
    pub at: DateTime<Utc>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Message template model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub account_id: AccountId,
    pub name: String,
    pub language: String,
    pub category: Option<String>,
    pub body: String,
    /// Field names recipients' data is looked up by, in placeholder order
    pub variables: serde_json::Value,
    /// Example values Meta holds for the placeholders
    pub sample_values: serde_json::Value,
    pub header_type: String,
    pub header_text: Option<String>,
    pub footer: Option<String>,
    pub buttons: serde_json::Value,
    pub status: String,
    pub remote_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Get approval status as enum
    pub fn status_enum(&self) -> TemplateStatus {
        self.status.parse().unwrap_or(TemplateStatus::Pending)
    }

    /// Get header type as enum
    pub fn header_type_enum(&self) -> HeaderType {
        self.header_type.parse().unwrap_or(HeaderType::None)
    }

    /// Declared variable names in placeholder order
    pub fn variables_vec(&self) -> Vec<String> {
        serde_json::from_value(self.variables.clone()).unwrap_or_default()
    }

    pub fn sample_values_vec(&self) -> Vec<String> {
        serde_json::from_value(self.sample_values.clone()).unwrap_or_default()
    }

    /// Number of distinct positional placeholders (`{{1}}`, `{{2}}`, ...) in the body
    pub fn placeholder_count(&self) -> usize {
        let mut seen: Vec<u32> = Vec::new();
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find("{{") {
            rest = &rest[start + 2..];
            let Some(end) = rest.find("}}") else {
                break;
            };
            if let Ok(n) = rest[..end].trim().parse::<u32>() {
                if !seen.contains(&n) {
                    seen.push(n);
                }
            }
            rest = &rest[end + 2..];
        }
        seen.len()
    }
}

/// Input for creating or replacing a template
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertTemplate {
    #[serde(default)]
    pub account_id: AccountId,
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub category: Option<String>,
    pub body: String,
    /// `None` keeps the names already stored
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub sample_values: Vec<String>,
    #[serde(default = "default_header_type")]
    pub header_type: HeaderType,
    #[serde(default)]
    pub header_text: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub buttons: serde_json::Value,
    #[serde(default = "default_template_status")]
    pub status: TemplateStatus,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

fn default_header_type() -> HeaderType {
    HeaderType::None
}

fn default_template_status() -> TemplateStatus {
    TemplateStatus::Pending
}

/// Recipient list model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecipientList {
    pub id: RecipientListId,
    pub name: String,
    pub description: Option<String>,
    pub recipient_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a recipient list
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecipientList {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A recipient stored on a list
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ListRecipient {
    pub id: RecipientId,
    pub list_id: RecipientListId,
    pub phone: String,
    pub name: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A recipient before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecipient {
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NewRecipient {
    /// Phone number reduced to digits and `+`, as imported
    pub fn cleaned_phone(&self) -> String {
        self.phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect()
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub account_id: AccountId,
    pub name: String,
    pub template_name: Option<String>,
    pub template_language: Option<String>,
    pub text_body: Option<String>,
    pub variable_mode: String,
    pub common_variables: serde_json::Value,
    pub recipient_list_id: Option<RecipientListId>,
    pub explicit_recipients: serde_json::Value,
    pub status: String,
    pub total_count: i32,
    pub queued_count: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get campaign status as enum
    pub fn status_enum(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Draft)
    }

    /// Get variable mode as enum
    pub fn variable_mode_enum(&self) -> VariableMode {
        self.variable_mode.parse().unwrap_or(VariableMode::Common)
    }

    /// Explicit recipients given at creation
    pub fn explicit_recipients_vec(&self) -> Vec<NewRecipient> {
        serde_json::from_value(self.explicit_recipients.clone()).unwrap_or_default()
    }

    /// Common template variables
    pub fn common_variables_vec(&self) -> Vec<String> {
        serde_json::from_value(self.common_variables.clone()).unwrap_or_default()
    }

    /// Whether the aggregate counters are consistent
    pub fn counters_balanced(&self) -> bool {
        self.queued_count + self.sent_count + self.failed_count == self.total_count
    }
}

/// Input for creating a campaign
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaign {
    pub account_id: AccountId,
    pub name: String,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_language: Option<String>,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default = "default_variable_mode")]
    pub variable_mode: VariableMode,
    #[serde(default)]
    pub common_variables: Vec<String>,
    #[serde(default)]
    pub recipient_list_id: Option<RecipientListId>,
    #[serde(default)]
    pub recipients: Vec<NewRecipient>,
}

fn default_variable_mode() -> VariableMode {
    VariableMode::Common
}

/// One deduplicated recipient of a campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub phone: String,
    pub name: Option<String>,
    pub data: serde_json::Value,
    pub state: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub retryable: bool,
    pub message_id: Option<MessageId>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecipient {
    /// Get delivery state as enum
    pub fn state_enum(&self) -> RecipientState {
        self.state.parse().unwrap_or(RecipientState::Queued)
    }
}

/// Result of one campaign send
#[derive(Debug, Clone)]
pub enum RecipientOutcome {
    Sent {
        message_id: MessageId,
    },
    Failed {
        message_id: Option<MessageId>,
        error: String,
        retryable: bool,
    },
}

/// A customer who has written to one of the accounts
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub account_id: AccountId,
    pub phone: String,
    /// WhatsApp profile name from the latest inbound message that carried one
    pub profile_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One received webhook delivery
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub object: Option<String>,
    pub outcome: String,
    pub events: i32,
    pub error: Option<String>,
    pub payload: String,
}

impl WebhookLog {
    pub fn outcome_enum(&self) -> WebhookOutcome {
        self.outcome.parse().unwrap_or(WebhookOutcome::Malformed)
    }
}

/// Input for logging a webhook delivery
#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub object: Option<String>,
    pub outcome: WebhookOutcome,
    pub events: i32,
    pub error: Option<String>,
    pub payload: String,
}

/// Automatic answer to an inbound text equal to `keyword`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KeywordReply {
    pub id: Uuid,
    pub account_id: AccountId,
    pub keyword: String,
    /// Outbound content as accepted by the send endpoint
    pub content: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a keyword reply
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertKeywordReply {
    #[serde(default)]
    pub account_id: AccountId,
    pub keyword: String,
    pub content: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Keywords match case-insensitively after trimming
pub fn normalize_keyword(text: &str) -> String {
    text.trim().to_lowercase()
}
