//! Repository layer for data access

pub mod accounts;
pub mod campaigns;
pub mod contacts;
pub mod keyword_replies;
pub mod memory;
pub mod messages;
pub mod recipient_lists;
pub mod templates;
pub mod webhook_logs;

use std::sync::Arc;

use crate::db::DatabasePool;
use whatsgate_common::Result;

pub use accounts::{AccountRepository, DbAccountRepository};
pub use campaigns::{CampaignRepository, DbCampaignRepository};
pub use contacts::{ContactRepository, DbContactRepository};
pub use keyword_replies::{DbKeywordReplyRepository, KeywordReplyRepository};
pub use memory::MemoryStore;
pub use messages::{DbMessageRepository, MessageRepository};
pub use recipient_lists::{DbRecipientListRepository, RecipientListRepository};
pub use templates::{DbTemplateRepository, TemplateRepository};
pub use webhook_logs::{DbWebhookLogRepository, WebhookLogRepository};

/// The set of repositories the services work against
#[derive(Clone)]
pub struct Store {
    pub accounts: Arc<dyn AccountRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub recipient_lists: Arc<dyn RecipientListRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub webhook_logs: Arc<dyn WebhookLogRepository>,
    pub keyword_replies: Arc<dyn KeywordReplyRepository>,
    pool: Option<DatabasePool>,
}

impl Store {
    /// Repositories backed by PostgreSQL
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            accounts: Arc::new(DbAccountRepository::new(pool.clone())),
            messages: Arc::new(DbMessageRepository::new(pool.clone())),
            templates: Arc::new(DbTemplateRepository::new(pool.clone())),
            recipient_lists: Arc::new(DbRecipientListRepository::new(pool.clone())),
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            contacts: Arc::new(DbContactRepository::new(pool.clone())),
            webhook_logs: Arc::new(DbWebhookLogRepository::new(pool.clone())),
            keyword_replies: Arc::new(DbKeywordReplyRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Repositories backed by a shared in-memory store
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            accounts: store.clone(),
            messages: store.clone(),
            templates: store.clone(),
            recipient_lists: store.clone(),
            campaigns: store.clone(),
            contacts: store.clone(),
            webhook_logs: store.clone(),
            keyword_replies: store,
            pool: None,
        }
    }

    /// Name of the storage backend
    pub fn backend(&self) -> &'static str {
        if self.pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }

    /// Check that the backing database answers
    pub async fn health_check(&self) -> Result<()> {
        match &self.pool {
            Some(pool) => pool.health_check().await,
            None => Ok(()),
        }
    }
}
