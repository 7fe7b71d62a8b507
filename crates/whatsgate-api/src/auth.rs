//! Authentication module

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use whatsgate_common::config::ApiKeyConfig;
use whatsgate_common::{Config, Result};
use whatsgate_core::webhook::secrets_equal;
use whatsgate_core::{
    CampaignRunner, CircuitBreaker, CloudApiClient, Dispatcher, HealthChecker, Metrics,
    RateLimiter, TemplateSync, WebhookIngestor,
};
use whatsgate_storage::Store;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub dispatcher: Arc<Dispatcher>,
    pub ingestor: Arc<WebhookIngestor>,
    pub campaigns: Arc<CampaignRunner>,
    pub template_sync: Arc<TemplateSync>,
    pub health: Arc<HealthChecker>,
    pub metrics: Arc<Metrics>,
    pub api_keys: Vec<ApiKeyConfig>,
}

impl AppState {
    /// Wire every service over `store` from the loaded configuration
    pub fn build(config: &Config, store: Store) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            CloudApiClient::new(&config.whatsapp)?,
            Arc::new(RateLimiter::new(&config.rate_limit)),
            Arc::new(
                CircuitBreaker::new(&config.circuit_breaker)
                    .with_call_timeout(Duration::from_secs(config.whatsapp.timeout_secs)),
            ),
            metrics.clone(),
        ));

        Ok(Self {
            ingestor: Arc::new(WebhookIngestor::new(
                store.clone(),
                config.webhook.clone(),
                metrics.clone(),
            )),
            campaigns: Arc::new(CampaignRunner::new(
                store.clone(),
                dispatcher.clone(),
                metrics.clone(),
                &config.campaign,
            )?),
            template_sync: Arc::new(TemplateSync::new(store.clone(), dispatcher.clone())),
            health: Arc::new(HealthChecker::new(
                store.clone(),
                dispatcher.clone(),
                metrics.clone(),
                config.health.clone(),
            )),
            api_keys: config.api.keys.clone(),
            store,
            dispatcher,
            metrics,
        })
    }
}

/// Authenticated context extracted from API key
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Name of the configured key, for audit logging
    pub key_name: String,
    /// Scopes granted to this API key
    pub scopes: Vec<String>,
}

impl AuthContext {
    /// Check if the authenticated context has a specific scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == "*" || s == scope)
    }
}

/// Extract API key from request
pub fn extract_api_key(req: &Request) -> Option<&str> {
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim());
            }
        }
    }

    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str.trim());
        }
    }

    None
}

/// Hash an API key for comparison
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify an API key against a configured hash.
///
/// Supports Argon2 PHC strings (`$argon2...`) and SHA-256 hex digests.
fn verify_api_key(api_key: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("$argon2") {
        return PasswordHash::new(stored_hash)
            .ok()
            .and_then(|parsed_hash| {
                Argon2::default()
                    .verify_password(api_key.as_bytes(), &parsed_hash)
                    .ok()
            })
            .is_some();
    }

    secrets_equal(&hash_api_key(api_key), &stored_hash.trim().to_ascii_lowercase())
}

/// Find the configured key matching `api_key`
fn validate_api_key<'a>(keys: &'a [ApiKeyConfig], api_key: &str) -> Option<&'a ApiKeyConfig> {
    if api_key.is_empty() {
        return None;
    }
    keys.iter().find(|key| verify_api_key(api_key, &key.key_hash))
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let api_key = extract_api_key(&request).ok_or_else(|| {
        warn!("Missing API key in request to {}", request.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    let key = validate_api_key(&state.api_keys, api_key).ok_or_else(|| {
        warn!("Invalid API key in request to {}", request.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    debug!("API key '{}' authenticated", key.name);
    let auth_context = AuthContext {
        key_name: key.name.clone(),
        scopes: key.scopes.clone(),
    };

    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

/// Check if the authenticated key has a specific scope
/// Returns an error if scope is missing
pub fn require_scope(auth_context: &AuthContext, scope: &str) -> std::result::Result<(), StatusCode> {
    if !auth_context.has_scope(scope) {
        warn!(
            "Scope access denied: API key '{}' lacks scope '{}'",
            auth_context.key_name, scope
        );
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};

    fn key(name: &str, key_hash: String, scopes: &[&str]) -> ApiKeyConfig {
        ApiKeyConfig {
            name: name.to_string(),
            key_hash,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn verifies_sha256_hash() {
        let api_key = "wg_test_sha_key";
        let hash = hash_api_key(api_key);

        assert!(verify_api_key(api_key, &hash));
        assert!(verify_api_key(api_key, &hash.to_uppercase()));
        assert!(!verify_api_key("wrong_key", &hash));
    }

    #[test]
    fn verifies_argon2_hash() {
        let api_key = "wg_test_argon2_key";
        let salt = SaltString::from_b64("d2hhdHNnYXRlc2FsdA").expect("valid salt");
        let hash = Argon2::default()
            .hash_password(api_key.as_bytes(), &salt)
            .expect("argon2 hash generation should succeed")
            .to_string();

        assert!(verify_api_key(api_key, &hash));
        assert!(!verify_api_key("wrong_key", &hash));
    }

    #[test]
    fn selects_matching_key() {
        let keys = vec![
            key("ops", hash_api_key("ops-key"), &["*"]),
            key("marketing", hash_api_key("mkt-key"), &["campaigns"]),
        ];

        assert_eq!(validate_api_key(&keys, "mkt-key").map(|k| k.name.as_str()), Some("marketing"));
        assert!(validate_api_key(&keys, "").is_none());
        assert!(validate_api_key(&keys, "unknown").is_none());
    }

    #[test]
    fn scope_checks() {
        let wildcard = AuthContext {
            key_name: "ops".to_string(),
            scopes: vec!["*".to_string()],
        };
        let narrow = AuthContext {
            key_name: "marketing".to_string(),
            scopes: vec!["campaigns".to_string()],
        };

        assert!(wildcard.has_scope("admin"));
        assert!(narrow.has_scope("campaigns"));
        assert_eq!(require_scope(&narrow, "admin"), Err(StatusCode::FORBIDDEN));
        assert_eq!(require_scope(&narrow, "campaigns"), Ok(()));
    }
}
