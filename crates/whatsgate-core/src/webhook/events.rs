//! Webhook payload parsing
//!
//! Turns a raw Cloud API webhook delivery into typed events. Parsing has
//! no side effects; [`super::WebhookIngestor`] applies the events.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use whatsgate_common::types::{ContentType, MessageStatus, TemplateStatus};
use whatsgate_common::{Error, Result};

/// `field` of changes carrying messages and statuses
const FIELD_MESSAGES: &str = "messages";

/// `field` of changes carrying template review results
const FIELD_TEMPLATE_STATUS: &str = "message_template_status_update";

/// A typed event extracted from a webhook delivery
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    /// A customer sent a message to one of our numbers
    Message {
        phone_number_id: String,
        message: InboundMessage,
    },
    /// Delivery status of an outbound message changed
    Status {
        phone_number_id: String,
        update: StatusUpdate,
    },
    /// A template was approved, rejected, paused or disabled
    TemplateStatus {
        business_account_id: String,
        update: TemplateStatusUpdate,
    },
}

impl WebhookEvent {
    /// Short name used for logging and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Message { .. } => "message",
            WebhookEvent::Status { .. } => "status",
            WebhookEvent::TemplateStatus { .. } => "template_status",
        }
    }
}

/// Inbound message content
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub remote_id: String,
    pub from: String,
    pub contact_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub content_type: ContentType,
    /// Text body, media caption, reaction emoji or reply title
    pub body: Option<String>,
    pub media_id: Option<String>,
    pub media_filename: Option<String>,
    /// Remote id of the message this one replies or reacts to
    pub reply_to: Option<String>,
}

/// Delivery status update for an outbound message
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub remote_id: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub recipient: Option<String>,
    pub error_code: Option<i64>,
    pub error_title: Option<String>,
}

/// Template review result
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStatusUpdate {
    pub remote_id: Option<String>,
    pub name: String,
    pub language: String,
    pub status: TemplateStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    object: Option<String>,
    entry: Option<Vec<Entry>>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    field: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesValue {
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    statuses: Vec<RawStatus>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    wa_id: Option<String>,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<String>,
    from: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<RawText>,
    image: Option<RawMedia>,
    video: Option<RawMedia>,
    audio: Option<RawMedia>,
    document: Option<RawMedia>,
    sticker: Option<RawMedia>,
    reaction: Option<RawReaction>,
    button: Option<RawButton>,
    interactive: Option<RawInteractive>,
    location: Option<RawLocation>,
    context: Option<RawContext>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    id: Option<String>,
    caption: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    message_id: Option<String>,
    emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawButton {
    text: Option<String>,
    payload: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInteractive {
    button_reply: Option<RawReply>,
    list_reply: Option<RawReply>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    id: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    id: Option<String>,
    status: Option<String>,
    timestamp: Option<String>,
    recipient_id: Option<String>,
    #[serde(default)]
    errors: Vec<RawStatusError>,
}

#[derive(Debug, Deserialize)]
struct RawStatusError {
    code: Option<i64>,
    title: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateStatusValue {
    event: Option<String>,
    message_template_id: Option<Value>,
    message_template_name: Option<String>,
    message_template_language: Option<String>,
    reason: Option<String>,
}

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedPayload(message.into())
}

/// Parse a raw webhook delivery into events
pub fn parse(raw: &[u8]) -> Result<Vec<WebhookEvent>> {
    let envelope: Envelope = serde_json::from_slice(raw)
        .map_err(|e| malformed(format!("Payload is not valid JSON: {}", e)))?;

    if envelope.object.is_none() {
        return Err(malformed("Missing 'object'"));
    }
    let entries = envelope.entry.ok_or_else(|| malformed("Missing 'entry'"))?;

    let mut events = Vec::new();
    for entry in entries {
        for change in entry.changes {
            match change.field.as_str() {
                FIELD_MESSAGES => parse_messages(change.value, &mut events)?,
                FIELD_TEMPLATE_STATUS => {
                    let business_account_id = entry.id.clone().unwrap_or_default();
                    if let Some(update) = parse_template_status(change.value)? {
                        events.push(WebhookEvent::TemplateStatus {
                            business_account_id,
                            update,
                        });
                    }
                }
                other => debug!(field = other, "Ignoring webhook change"),
            }
        }
    }

    Ok(events)
}

fn parse_messages(value: Value, events: &mut Vec<WebhookEvent>) -> Result<()> {
    let value: MessagesValue = serde_json::from_value(value)
        .map_err(|e| malformed(format!("Invalid messages change: {}", e)))?;

    let phone_number_id = value
        .metadata
        .and_then(|m| m.phone_number_id)
        .ok_or_else(|| malformed("Change without metadata.phone_number_id"))?;

    for raw in value.messages {
        let message = inbound_message(raw, &value.contacts)?;
        events.push(WebhookEvent::Message {
            phone_number_id: phone_number_id.clone(),
            message,
        });
    }

    for raw in value.statuses {
        let (Some(remote_id), Some(status)) = (raw.id, raw.status) else {
            return Err(malformed("Status without 'id' or 'status'"));
        };
        let status = match status.as_str() {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            other => {
                debug!(remote_id = %remote_id, status = other, "Ignoring unknown status");
                continue;
            }
        };
        let error = raw.errors.into_iter().next();
        events.push(WebhookEvent::Status {
            phone_number_id: phone_number_id.clone(),
            update: StatusUpdate {
                remote_id,
                status,
                timestamp: parse_timestamp(raw.timestamp.as_deref()),
                recipient: raw.recipient_id,
                error_code: error.as_ref().and_then(|e| e.code),
                error_title: error.and_then(|e| e.title.or(e.message)),
            },
        });
    }

    Ok(())
}

fn inbound_message(raw: RawMessage, contacts: &[Contact]) -> Result<InboundMessage> {
    let (Some(remote_id), Some(from)) = (raw.id, raw.from) else {
        return Err(malformed("Message without 'id' or 'from'"));
    };

    let contact_name = contacts
        .iter()
        .find(|c| c.wa_id.as_deref() == Some(from.as_str()))
        .or_else(|| contacts.first())
        .and_then(|c| c.profile.as_ref())
        .and_then(|p| p.name.clone());

    let mut message = InboundMessage {
        remote_id,
        from,
        contact_name,
        timestamp: parse_timestamp(raw.timestamp.as_deref()),
        content_type: ContentType::Unsupported,
        body: None,
        media_id: None,
        media_filename: None,
        reply_to: raw.context.and_then(|c| c.id),
    };

    let kind = raw.kind.unwrap_or_default();
    match kind.as_str() {
        "text" => {
            message.content_type = ContentType::Text;
            message.body = raw.text.and_then(|t| t.body);
        }
        "image" | "video" | "audio" | "document" | "sticker" => {
            let (content_type, media) = match kind.as_str() {
                "image" => (ContentType::Image, raw.image),
                "video" => (ContentType::Video, raw.video),
                "audio" => (ContentType::Audio, raw.audio),
                "document" => (ContentType::Document, raw.document),
                _ => (ContentType::Sticker, raw.sticker),
            };
            message.content_type = content_type;
            if let Some(media) = media {
                message.media_id = media.id;
                message.body = media.caption;
                message.media_filename = media.filename;
            }
        }
        "reaction" => {
            message.content_type = ContentType::Reaction;
            if let Some(reaction) = raw.reaction {
                message.body = reaction.emoji;
                message.reply_to = reaction.message_id.or(message.reply_to);
            }
        }
        "button" => {
            message.content_type = ContentType::Button;
            message.body = raw.button.and_then(|b| b.text.or(b.payload));
        }
        "interactive" => {
            message.content_type = ContentType::Interactive;
            message.body = raw
                .interactive
                .and_then(|i| i.button_reply.or(i.list_reply))
                .and_then(|r| r.title.or(r.id));
        }
        "location" => {
            message.content_type = ContentType::Location;
            message.body = raw.location.and_then(|l| match (l.latitude, l.longitude) {
                (Some(lat), Some(lon)) => Some(match l.name {
                    Some(name) => format!("{} ({}, {})", name, lat, lon),
                    None => format!("{}, {}", lat, lon),
                }),
                _ => l.name,
            });
        }
        other => debug!(kind = other, "Unsupported inbound message type"),
    }

    Ok(message)
}

fn parse_template_status(value: Value) -> Result<Option<TemplateStatusUpdate>> {
    let value: TemplateStatusValue = serde_json::from_value(value)
        .map_err(|e| malformed(format!("Invalid template status change: {}", e)))?;

    let (Some(name), Some(language), Some(event)) = (
        value.message_template_name,
        value.message_template_language,
        value.event,
    ) else {
        return Err(malformed("Template status without name, language or event"));
    };

    let Some(status) = TemplateStatus::from_remote(&event) else {
        debug!(template = %name, event = %event, "Ignoring unknown template event");
        return Ok(None);
    };

    let reason = value
        .reason
        .filter(|r| !r.is_empty() && !r.eq_ignore_ascii_case("NONE"));
    let remote_id = value.message_template_id.map(|id| match id {
        Value::String(s) => s,
        other => other.to_string(),
    });

    Ok(Some(TemplateStatusUpdate {
        remote_id,
        name,
        language,
        status,
        reason,
    }))
}

/// Unix seconds as sent by the Cloud API; now when absent or invalid
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}
