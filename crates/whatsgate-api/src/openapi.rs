//! OpenAPI documentation
//!
//! Provides the OpenAPI 3.0 specification of the WhatsGate API.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};

/// Create OpenAPI routes
pub fn create_openapi_routes() -> Router {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// OpenAPI JSON specification endpoint
async fn openapi_json() -> impl IntoResponse {
    Json(get_openapi_spec())
}

fn schema_ref(name: &str) -> Value {
    json!({"$ref": format!("#/components/schemas/{}", name)})
}

fn json_body(schema: Value) -> Value {
    json!({"content": {"application/json": {"schema": schema}}})
}

/// An authenticated operation
fn secured(tag: &str, summary: &str, operation_id: &str, responses: Value) -> Value {
    json!({
        "tags": [tag],
        "summary": summary,
        "operationId": operation_id,
        "security": [{"api_key": []}, {"bearer": []}],
        "responses": responses
    })
}

fn with_body(mut operation: Value, schema: &str) -> Value {
    operation["requestBody"] = json!({"required": true});
    operation["requestBody"]["content"] = json_body(schema_ref(schema))["content"].clone();
    operation
}

fn ok(description: &str, schema: Value) -> Value {
    let mut response = json_body(schema);
    response["description"] = json!(description);
    response
}

fn id_param(name: &str) -> Value {
    json!({
        "name": name,
        "in": "path",
        "required": true,
        "schema": {"type": "string", "format": "uuid"}
    })
}

/// Get the OpenAPI specification as JSON
fn get_openapi_spec() -> Value {
    let errors = json!({
        "401": {"description": "Missing or invalid API key"},
        "403": {"description": "API key lacks the required scope"}
    });
    let merge = |mut responses: Value| {
        if let (Some(target), Some(extra)) = (responses.as_object_mut(), errors.as_object()) {
            for (code, response) in extra {
                target.insert(code.clone(), response.clone());
            }
        }
        responses
    };

    let mut spec = json!({
        "openapi": "3.0.3",
        "info": {
            "title": "WhatsGate API",
            "description": "REST API for the WhatsGate WhatsApp Business integration\n\n## Authentication\n\nAll `/api/v1` endpoints require an API key.\n\n- **Header**: `X-API-Key: <your-api-key>`\n- **Bearer**: `Authorization: Bearer <your-api-key>`\n\nScopes: `admin` (accounts), `messages`, `templates`, `campaigns` (campaigns and recipient lists), `*` (all).",
            "version": env!("CARGO_PKG_VERSION"),
            "license": {
                "name": "Apache-2.0",
                "url": "https://www.apache.org/licenses/LICENSE-2.0"
            }
        },
        "tags": [
            {"name": "health", "description": "Health check endpoints"},
            {"name": "webhook", "description": "Cloud API webhook"},
            {"name": "accounts", "description": "Business account management (admin)"},
            {"name": "messages", "description": "Sending and conversation history"},
            {"name": "templates", "description": "Message templates"},
            {"name": "campaigns", "description": "Recipient lists and bulk campaigns"}
        ],
        "paths": {
            "/health": {
                "get": {
                    "tags": ["health"],
                    "summary": "Basic health check",
                    "operationId": "health",
                    "responses": {"200": ok("Service is healthy", schema_ref("HealthResponse"))}
                }
            },
            "/health/live": {
                "get": {
                    "tags": ["health"],
                    "summary": "Liveness probe",
                    "operationId": "liveness",
                    "responses": {"200": {"description": "Service is alive"}}
                }
            },
            "/health/ready": {
                "get": {
                    "tags": ["health"],
                    "summary": "Readiness probe",
                    "operationId": "readiness",
                    "responses": {
                        "200": {"description": "Service is ready"},
                        "503": {"description": "Database unavailable"}
                    }
                }
            },
            "/health/detailed": {
                "get": {
                    "tags": ["health"],
                    "summary": "Latest health report with per-account breaker and quota state",
                    "operationId": "healthDetailed",
                    "responses": {
                        "200": ok("Healthy or degraded", schema_ref("HealthReport")),
                        "503": ok("Unhealthy", schema_ref("HealthReport"))
                    }
                }
            },
            "/metrics": {
                "get": {
                    "tags": ["health"],
                    "summary": "Prometheus metrics",
                    "operationId": "metrics",
                    "responses": {"200": {"description": "Prometheus text exposition"}}
                }
            },
            "/webhook": {
                "get": {
                    "tags": ["webhook"],
                    "summary": "Subscription handshake",
                    "operationId": "verifyWebhook",
                    "parameters": [
                        {"name": "hub.mode", "in": "query", "required": true, "schema": {"type": "string"}},
                        {"name": "hub.verify_token", "in": "query", "required": true, "schema": {"type": "string"}},
                        {"name": "hub.challenge", "in": "query", "required": true, "schema": {"type": "string"}}
                    ],
                    "responses": {
                        "200": {"description": "The challenge, as plain text"},
                        "400": {"description": "Missing parameters"},
                        "403": {"description": "Verify token mismatch"}
                    }
                },
                "post": {
                    "tags": ["webhook"],
                    "summary": "Receive a Cloud API delivery",
                    "operationId": "receiveWebhook",
                    "parameters": [
                        {"name": "X-Hub-Signature-256", "in": "header", "required": false, "schema": {"type": "string"}}
                    ],
                    "responses": {
                        "200": {"description": "Delivery acknowledged"},
                        "401": {"description": "Signature check failed"}
                    }
                }
            },
            "/api/v1/accounts": {
                "get": secured("accounts", "List accounts", "listAccounts", merge(json!({
                    "200": ok("Accounts", json!({"type": "array", "items": schema_ref("Account")}))
                }))),
                "post": with_body(secured("accounts", "Create an account", "createAccount", merge(json!({
                    "201": ok("Created account", schema_ref("Account")),
                    "422": ok("Invalid input", schema_ref("ErrorResponse"))
                }))), "CreateAccount")
            },
            "/api/v1/accounts/{account_id}": {
                "parameters": [id_param("account_id")],
                "get": secured("accounts", "Get an account", "getAccount", merge(json!({
                    "200": ok("Account", schema_ref("Account")),
                    "404": ok("Not found", schema_ref("ErrorResponse"))
                }))),
                "patch": with_body(secured("accounts", "Update an account", "updateAccount", merge(json!({
                    "200": ok("Updated account", schema_ref("Account"))
                }))), "UpdateAccount"),
                "delete": secured("accounts", "Delete an account", "deleteAccount", merge(json!({
                    "204": {"description": "Deleted"},
                    "409": ok("Messages still reference the account", schema_ref("ErrorResponse"))
                })))
            },
            "/api/v1/accounts/{account_id}/templates": {
                "parameters": [id_param("account_id")],
                "get": secured("templates", "List templates", "listTemplates", merge(json!({
                    "200": ok("Templates", json!({"type": "array", "items": schema_ref("Template")}))
                }))),
                "post": with_body(secured("templates", "Create or replace a template", "upsertTemplate", merge(json!({
                    "200": ok("Replaced template", schema_ref("Template")),
                    "201": ok("Created template", schema_ref("Template"))
                }))), "UpsertTemplate")
            },
            "/api/v1/accounts/{account_id}/templates/sync": {
                "parameters": [id_param("account_id")],
                "post": secured("templates", "Sync templates from the Cloud API", "syncTemplates", merge(json!({
                    "200": ok("Sync counts", schema_ref("SyncReport")),
                    "502": ok("Remote API error", schema_ref("ErrorResponse")),
                    "503": ok("Circuit open", schema_ref("ErrorResponse"))
                })))
            },
            "/api/v1/messages": {
                "get": {
                    "tags": ["messages"],
                    "summary": "Conversation history with one phone number",
                    "operationId": "listMessages",
                    "security": [{"api_key": []}, {"bearer": []}],
                    "parameters": [
                        {"name": "phone", "in": "query", "required": true, "schema": {"type": "string"}},
                        {"name": "account_id", "in": "query", "required": false, "schema": {"type": "string", "format": "uuid"}},
                        {"name": "limit", "in": "query", "required": false, "schema": {"type": "integer"}},
                        {"name": "offset", "in": "query", "required": false, "schema": {"type": "integer"}}
                    ],
                    "responses": merge(json!({
                        "200": ok("Messages, newest first", schema_ref("MessageList"))
                    }))
                },
                "post": with_body(secured("messages", "Send a message", "sendMessage", merge(json!({
                    "201": ok("Message sent", schema_ref("SendReceipt")),
                    "422": ok("Validation failed", schema_ref("ErrorResponse")),
                    "429": ok("Rate limit exceeded", schema_ref("ErrorResponse")),
                    "502": ok("Remote API error", schema_ref("ErrorResponse")),
                    "503": ok("Circuit open", schema_ref("ErrorResponse"))
                }))), "SendRequest")
            },
            "/api/v1/messages/{id}": {
                "parameters": [id_param("id")],
                "get": secured("messages", "Get a message", "getMessage", merge(json!({
                    "200": ok("Message", schema_ref("Message")),
                    "404": ok("Not found", schema_ref("ErrorResponse"))
                })))
            },
            "/api/v1/messages/{id}/read": {
                "parameters": [id_param("id")],
                "post": secured("messages", "Send a read receipt for an inbound message", "markRead", merge(json!({
                    "204": {"description": "Read receipt sent"}
                })))
            },
            "/api/v1/recipient-lists": {
                "post": with_body(secured("campaigns", "Create a recipient list", "createRecipientList", merge(json!({
                    "201": ok("Created list", schema_ref("RecipientList"))
                }))), "CreateRecipientList")
            },
            "/api/v1/recipient-lists/{list_id}": {
                "parameters": [id_param("list_id")],
                "get": secured("campaigns", "Get a recipient list", "getRecipientList", merge(json!({
                    "200": ok("Recipient list", schema_ref("RecipientList"))
                })))
            },
            "/api/v1/recipient-lists/{list_id}/recipients": {
                "parameters": [id_param("list_id")],
                "get": secured("campaigns", "List recipients", "listRecipients", merge(json!({
                    "200": ok("Recipients", json!({"type": "array", "items": schema_ref("Recipient")}))
                }))),
                "post": with_body(secured("campaigns", "Import recipients", "addRecipients", merge(json!({
                    "200": ok("Import counts", json!({
                        "type": "object",
                        "properties": {
                            "added": {"type": "integer"},
                            "recipient_count": {"type": "integer"}
                        }
                    }))
                }))), "AddRecipients")
            },
            "/api/v1/campaigns": {
                "get": secured("campaigns", "List campaigns", "listCampaigns", merge(json!({
                    "200": ok("Campaigns", json!({"type": "array", "items": schema_ref("Campaign")}))
                }))),
                "post": with_body(secured("campaigns", "Create a draft campaign", "createCampaign", merge(json!({
                    "201": ok("Draft campaign", schema_ref("Campaign")),
                    "422": ok("Invalid campaign", schema_ref("ErrorResponse"))
                }))), "CreateCampaign")
            },
            "/api/v1/campaigns/{campaign_id}": {
                "parameters": [id_param("campaign_id")],
                "get": secured("campaigns", "Get a campaign", "getCampaign", merge(json!({
                    "200": ok("Campaign", schema_ref("Campaign"))
                })))
            },
            "/api/v1/campaigns/{campaign_id}/recipients": {
                "parameters": [id_param("campaign_id")],
                "get": secured("campaigns", "Recipients with delivery state", "listCampaignRecipients", merge(json!({
                    "200": ok("Recipients", json!({"type": "array", "items": schema_ref("Recipient")}))
                })))
            },
            "/api/v1/campaigns/{campaign_id}/enqueue": {
                "parameters": [id_param("campaign_id")],
                "post": secured("campaigns", "Resolve and persist recipients of a draft", "enqueueCampaign", merge(json!({
                    "200": ok("Queued campaign", schema_ref("Campaign")),
                    "409": ok("Not a draft", schema_ref("ErrorResponse"))
                })))
            },
            "/api/v1/campaigns/{campaign_id}/run": {
                "parameters": [
                    id_param("campaign_id"),
                    {"name": "wait", "in": "query", "required": false, "schema": {"type": "boolean"}}
                ],
                "post": secured("campaigns", "Send a campaign", "runCampaign", merge(json!({
                    "200": ok("Finished campaign (wait=true)", schema_ref("Campaign")),
                    "202": ok("Run started", schema_ref("Campaign")),
                    "409": ok("Campaign is not runnable", schema_ref("ErrorResponse"))
                })))
            },
            "/api/v1/campaigns/{campaign_id}/stop": {
                "parameters": [id_param("campaign_id")],
                "post": secured("campaigns", "Stop a campaign", "stopCampaign", merge(json!({
                    "200": ok("Stopped campaign", schema_ref("Campaign")),
                    "409": ok("Campaign already finished", schema_ref("ErrorResponse"))
                })))
            },
            "/api/v1/campaigns/{campaign_id}/retry": {
                "parameters": [
                    id_param("campaign_id"),
                    {"name": "wait", "in": "query", "required": false, "schema": {"type": "boolean"}}
                ],
                "post": secured("campaigns", "Resend retryable failures", "retryCampaign", merge(json!({
                    "200": ok("Finished campaign (wait=true)", schema_ref("Campaign")),
                    "202": ok("Retry started", schema_ref("Campaign"))
                })))
            },
            "/api/v1/campaigns/{campaign_id}/progress": {
                "parameters": [id_param("campaign_id")],
                "get": secured("campaigns", "Campaign progress counters", "getCampaignProgress", merge(json!({
                    "200": ok("Progress", schema_ref("CampaignProgress"))
                })))
            }
        },
        "components": {
            "securitySchemes": {
                "api_key": {
                    "type": "apiKey",
                    "in": "header",
                    "name": "X-API-Key"
                },
                "bearer": {
                    "type": "http",
                    "scheme": "bearer"
                }
            },
            "schemas": {
                "HealthResponse": {
                    "type": "object",
                    "properties": {"status": {"type": "string", "example": "healthy"}}
                },
                "HealthReport": {
                    "type": "object",
                    "properties": {
                        "status": {"type": "string", "enum": ["healthy", "degraded", "unhealthy"]},
                        "checked_at": {"type": "string", "format": "date-time"},
                        "storage_backend": {"type": "string", "enum": ["postgres", "memory"]},
                        "database": {"type": "object"},
                        "accounts": {"type": "array", "items": {"type": "object"}}
                    }
                },
                "ErrorResponse": {
                    "type": "object",
                    "required": ["error", "message"],
                    "properties": {
                        "error": {"type": "string", "example": "RATE_LIMITED"},
                        "message": {"type": "string"},
                        "retry_after_ms": {"type": "integer"},
                        "message_id": {"type": "string", "format": "uuid"}
                    }
                },
                "Account": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "format": "uuid"},
                        "name": {"type": "string"},
                        "phone_number_id": {"type": "string"},
                        "business_account_id": {"type": "string"},
                        "app_id": {"type": "string", "nullable": true},
                        "is_default_outgoing": {"type": "boolean"},
                        "is_default_incoming": {"type": "boolean"},
                        "auto_read_receipt": {"type": "boolean"},
                        "enabled": {"type": "boolean"}
                    }
                },
                "CreateAccount": {
                    "type": "object",
                    "required": ["name", "access_token", "phone_number_id", "business_account_id"],
                    "properties": {
                        "name": {"type": "string"},
                        "access_token": {"type": "string"},
                        "phone_number_id": {"type": "string"},
                        "business_account_id": {"type": "string"},
                        "app_id": {"type": "string"},
                        "webhook_verify_token": {"type": "string"},
                        "is_default_outgoing": {"type": "boolean"},
                        "is_default_incoming": {"type": "boolean"},
                        "auto_read_receipt": {"type": "boolean"},
                        "enabled": {"type": "boolean", "default": true}
                    }
                },
                "UpdateAccount": {
                    "type": "object",
                    "description": "Any subset of the CreateAccount fields"
                },
                "SendRequest": {
                    "type": "object",
                    "required": ["to", "content"],
                    "properties": {
                        "account_id": {"type": "string", "format": "uuid"},
                        "to": {"type": "string", "example": "+57 300 123 4567"},
                        "reply_to": {"type": "string"},
                        "content": {
                            "type": "object",
                                "description": "Tagged by `type`: text, template, media, reaction or interactive",
                            "required": ["type"],
                            "properties": {
                                "type": {"type": "string", "enum": ["text", "template", "media", "reaction", "interactive"]}
                            }
                        }
                    }
                },
                "SendReceipt": {
                    "type": "object",
                    "properties": {
                        "message_id": {"type": "string", "format": "uuid"},
                        "remote_id": {"type": "string"},
                        "status": {"type": "string"}
                    }
                },
                "Message": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "format": "uuid"},
                        "account_id": {"type": "string", "format": "uuid"},
                        "direction": {"type": "string", "enum": ["inbound", "outbound"]},
                        "phone": {"type": "string"},
                        "content_type": {"type": "string"},
                        "body": {"type": "string", "nullable": true},
                        "remote_id": {"type": "string", "nullable": true},
                        "status": {"type": "string"},
                        "created_at": {"type": "string", "format": "date-time"}
                    }
                },
                "MessageList": {
                    "type": "object",
                    "properties": {
                        "data": {"type": "array", "items": schema_ref("Message")},
                        "has_more": {"type": "boolean"}
                    }
                },
                "Template": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "format": "uuid"},
                        "name": {"type": "string"},
                        "language": {"type": "string"},
                        "body": {"type": "string"},
                        "variables": {"type": "array", "items": {"type": "string"}, "description": "Recipient data field per placeholder"},
                        "sample_values": {"type": "array", "items": {"type": "string"}},
                        "status": {"type": "string", "enum": ["pending", "approved", "rejected", "paused", "disabled"]}
                    }
                },
                "UpsertTemplate": {
                    "type": "object",
                    "required": ["name", "language", "body"],
                    "properties": {
                        "name": {"type": "string"},
                        "language": {"type": "string"},
                        "category": {"type": "string"},
                        "body": {"type": "string"},
                        "variables": {"type": "array", "items": {"type": "string"}, "description": "Omit to keep the stored names"},
                        "sample_values": {"type": "array", "items": {"type": "string"}},
                        "header_type": {"type": "string"},
                        "status": {"type": "string"}
                    }
                },
                "SyncReport": {
                    "type": "object",
                    "properties": {
                        "created": {"type": "integer"},
                        "updated": {"type": "integer"}
                    }
                },
                "RecipientList": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "format": "uuid"},
                        "name": {"type": "string"},
                        "description": {"type": "string", "nullable": true},
                        "recipient_count": {"type": "integer"}
                    }
                },
                "CreateRecipientList": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"}
                    }
                },
                "NewRecipient": {
                    "type": "object",
                    "required": ["phone"],
                    "properties": {
                        "phone": {"type": "string"},
                        "name": {"type": "string"},
                        "data": {"description": "Per-recipient template variables (object or array)"}
                    }
                },
                "AddRecipients": {
                    "type": "object",
                    "required": ["recipients"],
                    "properties": {
                        "recipients": {"type": "array", "items": schema_ref("NewRecipient")}
                    }
                },
                "Recipient": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "format": "uuid"},
                        "phone": {"type": "string"},
                        "name": {"type": "string", "nullable": true},
                        "state": {"type": "string"},
                        "last_error": {"type": "string", "nullable": true}
                    }
                },
                "CreateCampaign": {
                    "type": "object",
                    "required": ["account_id", "name"],
                    "properties": {
                        "account_id": {"type": "string", "format": "uuid"},
                        "name": {"type": "string"},
                        "template_name": {"type": "string"},
                        "template_language": {"type": "string"},
                        "text_body": {"type": "string"},
                        "variable_mode": {"type": "string", "enum": ["common", "unique"]},
                        "common_variables": {"type": "array", "items": {"type": "string"}},
                        "recipient_list_id": {"type": "string", "format": "uuid"},
                        "recipients": {"type": "array", "items": schema_ref("NewRecipient")}
                    }
                },
                "Campaign": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "format": "uuid"},
                        "account_id": {"type": "string", "format": "uuid"},
                        "name": {"type": "string"},
                        "status": {"type": "string", "enum": ["draft", "queued", "in_progress", "completed", "partially_failed", "stopped"]},
                        "total_count": {"type": "integer"},
                        "queued_count": {"type": "integer"},
                        "sent_count": {"type": "integer"},
                        "failed_count": {"type": "integer"}
                    }
                },
                "CampaignProgress": {
                    "type": "object",
                    "properties": {
                        "sent": {"type": "integer"},
                        "failed": {"type": "integer"},
                        "queued": {"type": "integer"},
                        "total": {"type": "integer"},
                        "percent": {"type": "number"},
                        "status": {"type": "string"}
                    }
                }
            }
        }
    });

    add_inbox_operations(&mut spec, &merge);
    spec
}

/// Contacts, keyword replies and the webhook delivery log
fn add_inbox_operations(spec: &mut Value, merge: &dyn Fn(Value) -> Value) {
    let paging = json!([
        {"name": "limit", "in": "query", "required": false, "schema": {"type": "integer"}},
        {"name": "offset", "in": "query", "required": false, "schema": {"type": "integer"}}
    ]);

    let mut contacts = secured("messages", "Customers who wrote to the account", "listContacts", merge(json!({
        "200": ok("Contacts, most recently seen first", json!({"type": "array", "items": schema_ref("Contact")}))
    })));
    contacts["parameters"] = paging.clone();
    spec["paths"]["/api/v1/accounts/{account_id}/contacts"] = json!({
        "parameters": [id_param("account_id")],
        "get": contacts
    });
    spec["paths"]["/api/v1/accounts/{account_id}/contacts/{phone}"] = json!({
        "parameters": [
            id_param("account_id"),
            {"name": "phone", "in": "path", "required": true, "schema": {"type": "string"}}
        ],
        "get": secured("messages", "Get a contact", "getContact", merge(json!({
            "200": ok("Contact", schema_ref("Contact")),
            "404": ok("Not found", schema_ref("ErrorResponse"))
        })))
    });

    spec["paths"]["/api/v1/accounts/{account_id}/keywords"] = json!({
        "parameters": [id_param("account_id")],
        "get": secured("accounts", "List keyword replies", "listKeywordReplies", merge(json!({
            "200": ok("Keyword replies", json!({"type": "array", "items": schema_ref("KeywordReply")}))
        }))),
        "post": with_body(secured("accounts", "Create or replace a keyword reply", "upsertKeywordReply", merge(json!({
            "200": ok("Saved reply", schema_ref("KeywordReply")),
            "422": ok("Invalid keyword or content", schema_ref("ErrorResponse"))
        }))), "UpsertKeywordReply")
    });
    spec["paths"]["/api/v1/accounts/{account_id}/keywords/{keyword}"] = json!({
        "parameters": [
            id_param("account_id"),
            {"name": "keyword", "in": "path", "required": true, "schema": {"type": "string"}}
        ],
        "delete": secured("accounts", "Delete a keyword reply", "deleteKeywordReply", merge(json!({
            "204": {"description": "Deleted"},
            "404": ok("Not found", schema_ref("ErrorResponse"))
        })))
    });

    let mut logs = secured("webhook", "Received webhook deliveries", "listWebhookLogs", merge(json!({
        "200": ok("Deliveries, newest first", json!({"type": "array", "items": schema_ref("WebhookLog")}))
    })));
    let mut log_params = paging;
    if let Some(params) = log_params.as_array_mut() {
        params.push(json!({
            "name": "outcome", "in": "query", "required": false,
            "schema": {"type": "string", "enum": ["processed", "malformed", "rejected"]}
        }));
    }
    logs["parameters"] = log_params;
    spec["paths"]["/api/v1/webhook-logs"] = json!({"get": logs});

    let schemas = &mut spec["components"]["schemas"];
    schemas["Contact"] = json!({
        "type": "object",
        "properties": {
            "account_id": {"type": "string", "format": "uuid"},
            "phone": {"type": "string"},
            "profile_name": {"type": "string", "nullable": true},
            "first_seen": {"type": "string", "format": "date-time"},
            "last_seen": {"type": "string", "format": "date-time"}
        }
    });
    schemas["KeywordReply"] = json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "format": "uuid"},
            "account_id": {"type": "string", "format": "uuid"},
            "keyword": {"type": "string"},
            "content": {"type": "object"},
            "enabled": {"type": "boolean"}
        }
    });
    schemas["UpsertKeywordReply"] = json!({
        "type": "object",
        "required": ["keyword", "content"],
        "properties": {
            "keyword": {"type": "string", "description": "Matched against the whole inbound text, ignoring case"},
            "content": {"type": "object", "description": "Same shape as SendRequest.content"},
            "enabled": {"type": "boolean", "default": true}
        }
    });
    schemas["WebhookLog"] = json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "format": "uuid"},
            "received_at": {"type": "string", "format": "date-time"},
            "object": {"type": "string", "nullable": true},
            "outcome": {"type": "string", "enum": ["processed", "malformed", "rejected"]},
            "events": {"type": "integer"},
            "error": {"type": "string", "nullable": true},
            "payload": {"type": "string"}
        }
    });
}
