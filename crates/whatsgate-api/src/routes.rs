//! API routes

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{
    accounts, campaigns, contacts, health, keywords, messages, metrics, recipient_lists,
    templates, webhook, webhook_logs,
};
use crate::openapi::create_openapi_routes;

/// Create the API router
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/detailed", get(health::health_detailed))
        .with_state(state.clone());

    // Cloud API webhook (authenticated by verify token and signature)
    let webhook_routes = Router::new()
        .route("/", get(webhook::verify).post(webhook::receive))
        .with_state(state.clone());

    // Account routes (admin)
    let account_routes = Router::new()
        .route("/", get(accounts::list_accounts).post(accounts::create_account))
        .route(
            "/:account_id",
            get(accounts::get_account)
                .patch(accounts::update_account)
                .delete(accounts::delete_account),
        )
        .route(
            "/:account_id/templates",
            get(templates::list_templates).post(templates::upsert_template),
        )
        .route("/:account_id/templates/sync", post(templates::sync_templates))
        .route("/:account_id/contacts", get(contacts::list_contacts))
        .route("/:account_id/contacts/:phone", get(contacts::get_contact))
        .route(
            "/:account_id/keywords",
            get(keywords::list_keywords).post(keywords::upsert_keyword),
        )
        .route("/:account_id/keywords/:keyword", delete(keywords::delete_keyword));

    // Message routes
    let message_routes = Router::new()
        .route("/", get(messages::list_messages).post(messages::send_message))
        .route("/:id", get(messages::get_message))
        .route("/:id/read", post(messages::mark_read));

    // Recipient list routes
    let recipient_list_routes = Router::new()
        .route("/", post(recipient_lists::create_recipient_list))
        .route("/:list_id", get(recipient_lists::get_recipient_list))
        .route(
            "/:list_id/recipients",
            get(recipient_lists::list_recipients).post(recipient_lists::add_recipients),
        );

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", get(campaigns::list_campaigns).post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/recipients", get(campaigns::list_campaign_recipients))
        .route("/:campaign_id/enqueue", post(campaigns::enqueue_campaign))
        .route("/:campaign_id/run", post(campaigns::run_campaign))
        .route("/:campaign_id/stop", post(campaigns::stop_campaign))
        .route("/:campaign_id/retry", post(campaigns::retry_campaign))
        .route("/:campaign_id/progress", get(campaigns::get_campaign_progress));

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics::metrics))
        .with_state(state.clone());

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/accounts", account_routes)
        .nest("/messages", message_routes)
        .nest("/recipient-lists", recipient_list_routes)
        .nest("/campaigns", campaign_routes)
        .route("/webhook-logs", get(webhook_logs::list_webhook_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/webhook", webhook_routes)
        .nest("/api/v1", api_v1)
        .merge(metrics_routes)
        .merge(create_openapi_routes())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// CORS for the configured origins; `*` allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_api_key;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use whatsgate_common::config::ApiKeyConfig;
    use whatsgate_common::types::{HeaderType, TemplateStatus};
    use whatsgate_common::Config;
    use whatsgate_core::webhook::signature;
    use whatsgate_storage::{Account, CreateAccount, Store, UpsertTemplate};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    const ADMIN_KEY: &str = "wg_admin_key";
    const CAMPAIGN_KEY: &str = "wg_campaign_key";
    const APP_SECRET: &str = "app-secret";

    struct TestApp {
        router: Router,
        store: Store,
    }

    impl TestApp {
        fn new(server: &MockServer) -> Self {
            let mut config = Config::default();
            config.whatsapp.base_url = server.uri();
            config.health.probe_remote = false;
            config.webhook.verify_token = Some("verify-me".to_string());
            config.webhook.app_secret = Some(APP_SECRET.to_string());
            config.api.keys = vec![
                ApiKeyConfig {
                    name: "ops".to_string(),
                    key_hash: hash_api_key(ADMIN_KEY),
                    scopes: vec!["*".to_string()],
                },
                ApiKeyConfig {
                    name: "marketing".to_string(),
                    key_hash: hash_api_key(CAMPAIGN_KEY),
                    scopes: vec!["campaigns".to_string()],
                },
            ];

            let store = Store::memory();
            let state = Arc::new(AppState::build(&config, store.clone()).unwrap());
            Self {
                router: create_router(state, &[]),
                store,
            }
        }

        async fn request(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, body.to_vec())
        }

        async fn call(&self, method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(key) = key {
                builder = builder.header("authorization", format!("Bearer {}", key));
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let (status, body) = self.request(request).await;
            let value = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&body).unwrap_or(Value::Null)
            };
            (status, value)
        }

        async fn account(&self) -> Account {
            self.store
                .accounts
                .create(CreateAccount {
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
                })
                .await
                .unwrap()
        }

        async fn approved_template(&self, account: &Account) {
            self.store
                .templates
                .upsert(UpsertTemplate {
                    account_id: account.id,
                    name: "order_update".to_string(),
                    language: "en_US".to_string(),
                    category: Some("UTILITY".to_string()),
                    body: "Hi {{1}}, order {{2}} shipped".to_string(),
                    variables: Some(vec!["name".to_string(), "order".to_string()]),
                    sample_values: vec!["Ana".to_string(), "A-1".to_string()],
                    header_type: HeaderType::None,
                    header_text: None,
                    footer: None,
                    buttons: Value::Null,
                    status: TemplateStatus::Approved,
                    remote_id: None,
                    rejection_reason: None,
                })
                .await
                .unwrap();
        }
    }

    /// Answers every send with a fresh remote id
    struct SequentialIds(AtomicUsize);

    impl Respond for SequentialIds {
        fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200)
                .set_body_json(json!({"messages": [{"id": format!("wamid.OUT.{}", n)}]}))
        }
    }

    async fn mock_send(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .respond_with(SequentialIds(AtomicUsize::new(1)))
            .mount(server)
            .await;
    }

    fn inbound_delivery(remote_id: &str) -> String {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "waba-7", "changes": [{"field": "messages", "value": {
                "metadata": {"phone_number_id": "1055"},
                "contacts": [{"profile": {"name": "Ana"}, "wa_id": "573001234567"}],
                "messages": [{
                    "from": "573001234567",
                    "id": remote_id,
                    "timestamp": "1700000000",
                    "type": "text",
                    "text": {"body": "Hola"}
                }]
            }}]}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health_routes() {
        let server = MockServer::start().await;
        let app = TestApp::new(&server);

        let (status, body) = app.call("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        assert_eq!(app.call("GET", "/health/live", None, None).await.0, StatusCode::OK);
        assert_eq!(app.call("GET", "/health/ready", None, None).await.0, StatusCode::OK);

        let (status, body) = app.call("GET", "/health/detailed", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage_backend"], "memory");
    }

    #[tokio::test]
    async fn test_api_requires_key_and_scope() {
        let server = MockServer::start().await;
        let app = TestApp::new(&server);

        let (status, _) = app.call("GET", "/api/v1/accounts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.call("GET", "/api/v1/accounts", Some("not-a-key"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.call("GET", "/api/v1/accounts", Some(CAMPAIGN_KEY), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "FORBIDDEN");

        let request = Request::builder()
            .uri("/api/v1/accounts")
            .header("x-api-key", ADMIN_KEY)
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.request(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_account_lifecycle_hides_secrets() {
        let server = MockServer::start().await;
        let app = TestApp::new(&server);

        let (status, body) = app
            .call(
                "POST",
                "/api/v1/accounts",
                Some(ADMIN_KEY),
                Some(json!({
                    "name": "Sales",
                    "access_token": "EAAG-token",
                    "phone_number_id": "2077",
                    "business_account_id": "waba-9",
                    "webhook_verify_token": "sales-verify"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.get("access_token").is_none());
        assert!(body.get("webhook_verify_token").is_none());
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                "PATCH",
                &format!("/api/v1/accounts/{}", id),
                Some(ADMIN_KEY),
                Some(json!({"auto_read_receipt": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["auto_read_receipt"], true);

        let (status, _) = app
            .call("POST", "/api/v1/accounts", Some(ADMIN_KEY), Some(json!({
                "name": "",
                "access_token": "t",
                "phone_number_id": "1",
                "business_account_id": "2"
            })))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let uri = format!("/api/v1/accounts/{}", id);
        assert_eq!(app.call("DELETE", &uri, Some(ADMIN_KEY), None).await.0, StatusCode::NO_CONTENT);
        assert_eq!(app.call("GET", &uri, Some(ADMIN_KEY), None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_verification() {
        let server = MockServer::start().await;
        let app = TestApp::new(&server);

        let request = Request::builder()
            .uri("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444")
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.request(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"1158201444");

        let request = Request::builder()
            .uri("/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.request(request).await.0, StatusCode::FORBIDDEN);

        let request = Request::builder()
            .uri("/webhook?hub.mode=subscribe")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.request(request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_delivery_signature_and_dedupe() {
        let server = MockServer::start().await;
        let app = TestApp::new(&server);
        let account = app.account().await;

        let payload = inbound_delivery("wamid.IN1");
        let unsigned = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from(payload.clone()))
            .unwrap();
        assert_eq!(app.request(unsigned).await.0, StatusCode::UNAUTHORIZED);

        let signed = || {
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header(
                    "x-hub-signature-256",
                    signature::sign(APP_SECRET, payload.as_bytes()).unwrap(),
                )
                .body(Body::from(payload.clone()))
                .unwrap()
        };
        let (status, body) = app.request(signed()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(app.request(signed()).await.0, StatusCode::OK);

        let history = app
            .store
            .messages
            .list_by_phone(account.id, "573001234567", 10, 0)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].remote_id.as_deref(), Some("wamid.IN1"));

        let garbage = b"not json".to_vec();
        let malformed = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-hub-signature-256", signature::sign(APP_SECRET, &garbage).unwrap())
            .body(Body::from(garbage))
            .unwrap();
        assert_eq!(app.request(malformed).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_keyword_reply_contacts_and_delivery_log() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .and(body_partial_json(json!({
                "to": "573001234567",
                "type": "interactive",
                "interactive": {"type": "button"}
            })))
            .respond_with(SequentialIds(AtomicUsize::new(1)))
            .expect(1)
            .mount(&server)
            .await;
        let app = TestApp::new(&server);
        let account = app.account().await;
        let keywords = format!("/api/v1/accounts/{}/keywords", account.id);

        let (status, _) = app
            .call(
                "POST",
                &keywords,
                Some(ADMIN_KEY),
                Some(json!({"keyword": "hola", "content": {"type": "text", "body": ""}})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, reply) = app
            .call(
                "POST",
                &keywords,
                Some(ADMIN_KEY),
                Some(json!({"keyword": " Hola ", "content": {
                    "type": "interactive",
                    "interactive": {
                        "kind": "buttons",
                        "body": "Hi! What do you need?",
                        "buttons": [
                            {"id": "orders", "title": "My orders"},
                            {"id": "agent", "title": "Talk to someone"}
                        ]
                    }
                }})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["keyword"], "hola");
        let (_, listed) = app.call("GET", &keywords, Some(ADMIN_KEY), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let payload = inbound_delivery("wamid.KW1");
        let delivery = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(
                "x-hub-signature-256",
                signature::sign(APP_SECRET, payload.as_bytes()).unwrap(),
            )
            .body(Body::from(payload))
            .unwrap();
        assert_eq!(app.request(delivery).await.0, StatusCode::OK);

        // the reply is sent after the acknowledgement
        for _ in 0..50 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let (status, contacts) = app
            .call("GET", &format!("/api/v1/accounts/{}/contacts", account.id), Some(ADMIN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(contacts[0]["phone"], "573001234567");
        assert_eq!(contacts[0]["profile_name"], "Ana");

        let (status, logs) = app
            .call("GET", "/api/v1/webhook-logs?outcome=processed", Some(ADMIN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logs.as_array().unwrap().len(), 1);
        assert_eq!(logs[0]["events"], 1);

        let (status, _) = app.call("GET", "/api/v1/webhook-logs", Some(CAMPAIGN_KEY), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call("DELETE", &format!("{}/HOLA", keywords), Some(ADMIN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_send_and_fetch_message() {
        let server = MockServer::start().await;
        mock_send(&server).await;
        let app = TestApp::new(&server);
        let account = app.account().await;
        app.approved_template(&account).await;

        let (status, receipt) = app
            .call(
                "POST",
                "/api/v1/messages",
                Some(ADMIN_KEY),
                Some(json!({
                    "to": "+57 300 123 4567",
                    "content": {
                        "type": "template",
                        "name": "order_update",
                        "language": "en_US",
                        "body_params": ["Ana", "A-1"]
                    }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["remote_id"], "wamid.OUT.1");
        assert_eq!(receipt["status"], "sent");

        let uri = format!("/api/v1/messages/{}", receipt["message_id"].as_str().unwrap());
        let (status, message) = app.call("GET", &uri, Some(ADMIN_KEY), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(message["phone"], "573001234567");
        assert_eq!(message["template_name"], "order_update");

        let (status, list) = app
            .call("GET", "/api/v1/messages?phone=573001234567", Some(ADMIN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["data"].as_array().unwrap().len(), 1);

        // No inbound contact, so free-form text is refused before any remote call
        let (status, body) = app
            .call(
                "POST",
                "/api/v1/messages",
                Some(ADMIN_KEY),
                Some(json!({"to": "573001234567", "content": {"type": "text", "body": "Hi"}})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_campaign_flow() {
        let server = MockServer::start().await;
        mock_send(&server).await;
        let app = TestApp::new(&server);
        let account = app.account().await;
        app.approved_template(&account).await;

        let (status, list) = app
            .call("POST", "/api/v1/recipient-lists", Some(CAMPAIGN_KEY), Some(json!({"name": "VIP"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let list_id = list["id"].as_str().unwrap().to_string();

        let (status, added) = app
            .call(
                "POST",
                &format!("/api/v1/recipient-lists/{}/recipients", list_id),
                Some(CAMPAIGN_KEY),
                Some(json!({"recipients": [
                    {"phone": "573001234567", "name": "Ana"},
                    {"phone": "+57 300 123 4567", "name": "Ana again"},
                    {"phone": "573009876543", "name": "Luis"}
                ]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(added["added"], 3);

        let (status, campaign) = app
            .call(
                "POST",
                "/api/v1/campaigns",
                Some(CAMPAIGN_KEY),
                Some(json!({
                    "account_id": account.id,
                    "name": "Shipping notice",
                    "template_name": "order_update",
                    "template_language": "en_US",
                    "common_variables": ["friend", "A-1"],
                    "recipient_list_id": list_id
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(campaign["status"], "draft");
        let id = campaign["id"].as_str().unwrap().to_string();

        let (status, finished) = app
            .call("POST", &format!("/api/v1/campaigns/{}/run?wait=true", id), Some(CAMPAIGN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(finished["status"], "completed");

        let (status, progress) = app
            .call("GET", &format!("/api/v1/campaigns/{}/progress", id), Some(CAMPAIGN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress["total"], 2);
        assert_eq!(progress["sent"], 2);
        assert_eq!(progress["queued"], 0);

        let (status, body) = app
            .call("POST", &format!("/api/v1/campaigns/{}/stop", id), Some(CAMPAIGN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "CONFLICT");

        let (status, _) = app
            .call("POST", &format!("/api/v1/campaigns/{}/run", id), Some(CAMPAIGN_KEY), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_metrics_and_openapi() {
        let server = MockServer::start().await;
        let app = TestApp::new(&server);

        let (status, body) = app
            .request(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("whatsgate_open_circuit_breakers"));

        let (status, spec) = app.call("GET", "/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(spec["info"]["title"], "WhatsGate API");
        assert!(spec["paths"].get("/webhook").is_some());
    }
}
