//! Template Sync - Mirrors the business account's templates locally

use crate::cloud_api::payload::RemoteComponent;
use crate::cloud_api::RemoteTemplate;
use crate::dispatcher::Dispatcher;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use whatsgate_common::types::{AccountId, HeaderType, TemplateStatus};
use whatsgate_common::Result;
use whatsgate_storage::models::UpsertTemplate;
use whatsgate_storage::Store;

/// Upper bound on pages fetched in one sync
const MAX_PAGES: usize = 50;

/// Counts from one sync run
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
}

/// Template synchroniser
pub struct TemplateSync {
    store: Store,
    dispatcher: Arc<Dispatcher>,
}

impl TemplateSync {
    pub fn new(store: Store, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Fetch every template of the account and upsert it by (name, language)
    pub async fn sync(&self, account_id: AccountId) -> Result<SyncReport> {
        let account = self.dispatcher.resolve_account(Some(account_id)).await?;
        let client = self.dispatcher.client();
        let breaker = self.dispatcher.circuit_breaker();

        let mut report = SyncReport::default();
        let mut cursor: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let page = breaker
                .call(account.id, client.list_templates(&account, cursor.as_deref()))
                .await?;
            debug!(
                account_id = %account.id,
                page = page_number,
                templates = page.data.len(),
                "Fetched template page"
            );

            for remote in &page.data {
                let (_, created) = self.store.templates.upsert(to_upsert(account.id, remote)).await?;
                if created {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
            }

            match page.next_cursor() {
                Some(next) if Some(next) != cursor.as_deref() => cursor = Some(next.to_string()),
                _ => {
                    info!(
                        account_id = %account.id,
                        created = report.created,
                        updated = report.updated,
                        "Templates synced"
                    );
                    return Ok(report);
                }
            }
        }

        warn!(account_id = %account.id, "Template sync stopped after {} pages", MAX_PAGES);
        Ok(report)
    }
}

fn component<'a>(remote: &'a RemoteTemplate, kind: &str) -> Option<&'a RemoteComponent> {
    remote
        .components
        .iter()
        .find(|c| c.kind.eq_ignore_ascii_case(kind))
}

/// Map a remote template onto the stored shape
fn to_upsert(account_id: AccountId, remote: &RemoteTemplate) -> UpsertTemplate {
    let status = TemplateStatus::from_remote(&remote.status).unwrap_or(TemplateStatus::Pending);
    let body = component(remote, "BODY");
    let header = component(remote, "HEADER");

    // BODY example: {"body_text": [["value 1", "value 2"]]}
    let sample_values = body
        .and_then(|b| b.example.as_ref())
        .and_then(|e| e.get("body_text"))
        .and_then(|t| t.get(0))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let header_type = header
        .and_then(|h| h.format.as_deref())
        .map(|format| match format.to_ascii_uppercase().as_str() {
            "TEXT" => HeaderType::Text,
            "IMAGE" => HeaderType::Image,
            "DOCUMENT" => HeaderType::Document,
            "VIDEO" => HeaderType::Video,
            _ => HeaderType::None,
        })
        .unwrap_or(HeaderType::None);

    let rejection_reason = match status {
        TemplateStatus::Rejected => remote
            .rejected_reason
            .clone()
            .filter(|r| !r.eq_ignore_ascii_case("NONE")),
        _ => None,
    };

    UpsertTemplate {
        account_id,
        name: remote.name.clone(),
        language: remote.language.clone(),
        category: remote.category.clone(),
        body: body.and_then(|b| b.text.clone()).unwrap_or_default(),
        // field names are ours; a sync never overwrites them
        variables: None,
        sample_values,
        header_type,
        header_text: header.and_then(|h| h.text.clone()),
        footer: component(remote, "FOOTER").and_then(|f| f.text.clone()),
        buttons: component(remote, "BUTTONS")
            .and_then(|b| b.buttons.clone())
            .unwrap_or(Value::Null),
        status,
        remote_id: Some(remote.id.clone()),
        rejection_reason,
    }
}
