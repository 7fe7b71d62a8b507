//! Shared fixtures for unit tests

use crate::circuit_breaker::CircuitBreaker;
use crate::cloud_api::CloudApiClient;
use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use whatsgate_common::config::{CircuitBreakerConfig, RateLimitConfig, WhatsAppConfig, WindowKind};
use whatsgate_common::types::{ContentType, Direction, HeaderType, MessageStatus, TemplateStatus};
use whatsgate_storage::models::{Account, CreateAccount, CreateMessage, UpsertTemplate};
use whatsgate_storage::Store;
use wiremock::{Respond, ResponseTemplate};

pub(crate) fn test_account() -> Account {
    Account {
        id: Uuid::new_v4(),
        name: "Support".to_string(),
        access_token: "secret-token".to_string(),
        phone_number_id: "1055".to_string(),
        business_account_id: "waba-7".to_string(),
        app_id: None,
        webhook_verify_token: None,
        is_default_outgoing: true,
        is_default_incoming: true,
        auto_read_receipt: false,
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub(crate) fn account_input(phone_number_id: &str) -> CreateAccount {
    CreateAccount {
        name: "Support".to_string(),
        access_token: "secret-token".to_string(),
        phone_number_id: phone_number_id.to_string(),
        business_account_id: "waba-7".to_string(),
        app_id: None,
        webhook_verify_token: Some("account-verify".to_string()),
        is_default_outgoing: true,
        is_default_incoming: true,
        auto_read_receipt: false,
        enabled: true,
    }
}

pub(crate) fn client_for(base_url: &str) -> CloudApiClient {
    CloudApiClient::new(&WhatsAppConfig {
        base_url: base_url.to_string(),
        api_version: "v18.0".to_string(),
        timeout_secs: 2,
    })
    .unwrap()
}

/// A dispatcher over a memory store talking to `base_url`
pub(crate) fn dispatcher(store: &Store, base_url: &str, max_calls: u32) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        store.clone(),
        client_for(base_url),
        Arc::new(RateLimiter::new(&RateLimitConfig {
            max_calls,
            window: WindowKind::Sliding,
            ..RateLimitConfig::default()
        })),
        Arc::new(CircuitBreaker::new(&CircuitBreakerConfig::default())),
        Arc::new(Metrics::new().unwrap()),
    ))
}

/// Record an inbound message so free-form sends to `phone` are allowed
pub(crate) async fn open_window(store: &Store, account: &Account, phone: &str) {
    let mut input = CreateMessage::new(
        account.id,
        Direction::Inbound,
        phone,
        ContentType::Text,
        MessageStatus::Received,
    );
    input.remote_id = Some(format!("wamid.in-{}", Uuid::new_v4()));
    input.body = Some("hello".to_string());
    store.messages.create(input).await.unwrap();
}

pub(crate) async fn approved_template(store: &Store, account: &Account, name: &str, body: &str) {
    store
        .templates
        .upsert(UpsertTemplate {
            account_id: account.id,
            name: name.to_string(),
            language: "en_US".to_string(),
            category: Some("UTILITY".to_string()),
            body: body.to_string(),
            variables: Some(vec!["name".to_string(), "order".to_string()]),
            sample_values: vec!["Ana".to_string(), "A-1".to_string()],
            header_type: HeaderType::None,
            header_text: None,
            footer: None,
            buttons: serde_json::Value::Null,
            status: TemplateStatus::Approved,
            remote_id: None,
            rejection_reason: None,
        })
        .await
        .unwrap();
}

/// Answers message sends with a fresh remote id per call (`{prefix}.1`, `{prefix}.2`, ...)
pub(crate) struct SequentialIds {
    prefix: &'static str,
    next: AtomicUsize,
    delay: Duration,
}

impl SequentialIds {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicUsize::new(1),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Respond for SequentialIds {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200)
            .set_delay(self.delay)
            .set_body_json(json!({"messages": [{"id": format!("{}.{}", self.prefix, n)}]}))
    }
}
