//! Cloud API HTTP client

use super::payload::{ErrorEnvelope, OutboundMessage, SendResponse, TemplatePage};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use whatsgate_common::config::WhatsAppConfig;
use whatsgate_common::{Error, Result};
use whatsgate_storage::models::Account;

/// Page size requested when listing templates
const TEMPLATE_PAGE_LIMIT: u32 = 100;

/// Client for the Meta WhatsApp Cloud API
#[derive(Clone)]
pub struct CloudApiClient {
    base_url: String,
    api_version: String,
    client: Client,
}

impl CloudApiClient {
    /// Create a new client; every request is bounded by `timeout_secs`
    pub fn new(config: &WhatsAppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, path)
    }

    /// Build a bearer-authenticated request for the account
    fn build_request(&self, method: Method, account: &Account, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&account.access_token)
    }

    /// Send a message; returns the remote message id
    pub async fn send_message(&self, account: &Account, message: &OutboundMessage) -> Result<String> {
        let path = format!("{}/messages", account.phone_number_id);
        debug!(account_id = %account.id, to = %message.to, "Sending message");

        let response = self
            .build_request(Method::POST, account, &path)
            .json(&message.to_request_body())
            .send()
            .await
            .map_err(transport_error)?;

        let sent: SendResponse = Self::parse(response).await?;
        sent.messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| Error::RemoteApi {
                status: Some(200),
                code: None,
                message: "Response carried no message id".to_string(),
            })
    }

    /// Mark an inbound message as read
    pub async fn mark_as_read(&self, account: &Account, remote_id: &str) -> Result<()> {
        let path = format!("{}/messages", account.phone_number_id);
        let response = self
            .build_request(Method::POST, account, &path)
            .json(&json!({
                "messaging_product": "whatsapp",
                "status": "read",
                "message_id": remote_id,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    /// Fetch one page of the business account's templates
    pub async fn list_templates(&self, account: &Account, after: Option<&str>) -> Result<TemplatePage> {
        let path = format!("{}/message_templates", account.business_account_id);
        let limit = TEMPLATE_PAGE_LIMIT.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(after) = after {
            query.push(("after", after));
        }

        let response = self
            .build_request(Method::GET, account, &path)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        Self::parse(response).await
    }

    /// Check that the phone number is reachable with the account's token
    pub async fn probe(&self, account: &Account) -> Result<()> {
        let response = self
            .build_request(Method::GET, account, &account.phone_number_id)
            .query(&[("fields", "id")])
            .send()
            .await
            .map_err(transport_error)?;

        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    /// Decode a 2xx body, or turn the error envelope into `RemoteApi`
    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| Error::RemoteApi {
                status: Some(status.as_u16()),
                code: None,
                message: format!("Invalid response body: {}", e),
            });
        }

        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                let e = envelope.error;
                let message = e
                    .error_user_msg
                    .or(e.message)
                    .or(e.error_user_title)
                    .unwrap_or_else(|| status.to_string());
                (e.code, message)
            }
            Err(_) => (None, format!("HTTP {}", status)),
        };

        warn!(status = status.as_u16(), ?code, %message, "Cloud API request failed");
        Err(Error::RemoteApi {
            status: Some(status.as_u16()),
            code,
            message,
        })
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::transport(format!("Request timed out: {}", e))
    } else {
        Error::transport(format!("Request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_api::payload::OutboundContent;
    use crate::test_support::test_account;
    use pretty_assertions::assert_eq;
    use whatsgate_common::types::PhoneNumber;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, timeout_secs: u64) -> CloudApiClient {
        CloudApiClient::new(&WhatsAppConfig {
            base_url: server.uri(),
            api_version: "v18.0".to_string(),
            timeout_secs,
        })
        .unwrap()
    }

    fn text(body: &str) -> OutboundMessage {
        OutboundMessage {
            to: PhoneNumber::parse("573001234567").unwrap(),
            content: OutboundContent::Text {
                body: body.to_string(),
                preview_url: false,
            },
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_send_message_returns_remote_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_partial_json(json!({"to": "573001234567", "type": "text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "contacts": [{"input": "573001234567", "wa_id": "573001234567"}],
                "messages": [{"id": "wamid.OUT1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let remote_id = client(&server, 5)
            .send_message(&test_account(), &text("hi"))
            .await
            .unwrap();
        assert_eq!(remote_id, "wamid.OUT1");
    }

    #[tokio::test]
    async fn test_error_envelope_becomes_remote_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "(#131030) Recipient phone number not in allowed list",
                    "code": 131030,
                    "error_user_title": "Not allowed",
                    "error_user_msg": "Add the number to the allowed list"
                }
            })))
            .mount(&server)
            .await;

        match client(&server, 5).send_message(&test_account(), &text("hi")).await {
            Err(Error::RemoteApi {
                status,
                code,
                message,
            }) => {
                assert_eq!(status, Some(400));
                assert_eq!(code, Some(131030));
                assert_eq!(message, "Add the number to the allowed list");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_transient_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({"messages": [{"id": "late"}]})),
            )
            .mount(&server)
            .await;

        let err = client(&server, 1)
            .send_message(&test_account(), &text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteApi { status: None, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_templates_passes_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v18.0/waba-7/message_templates"))
            .and(query_param("after", "cursor-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "77",
                    "name": "welcome",
                    "language": "en",
                    "status": "APPROVED",
                    "category": "MARKETING",
                    "components": [{"type": "BODY", "text": "Hi {{1}}"}]
                }]
            })))
            .mount(&server)
            .await;

        let page = client(&server, 5)
            .list_templates(&test_account(), Some("cursor-1"))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].components[0].text.as_deref(), Some("Hi {{1}}"));
        assert_eq!(page.next_cursor(), None);
    }

    #[tokio::test]
    async fn test_mark_as_read_and_probe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1055/messages"))
            .and(body_partial_json(json!({"status": "read", "message_id": "wamid.IN"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v18.0/1055"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server, 5);
        client.mark_as_read(&test_account(), "wamid.IN").await.unwrap();
        let err = client.probe(&test_account()).await.unwrap_err();
        assert!(matches!(err, Error::RemoteApi { status: Some(503), .. }));
    }
}
