//! Cloud API request and response payloads

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use whatsgate_common::types::{ContentType, PhoneNumber};
use whatsgate_common::{Error, Result};

/// Longest text body the Cloud API accepts
pub const MAX_TEXT_LEN: usize = 4096;

/// Longest body of an interactive message
pub const MAX_INTERACTIVE_BODY_LEN: usize = 1024;

/// Rows allowed in a list message
pub const MAX_LIST_ROWS: usize = 10;

/// Longest list row id and title
pub const MAX_ROW_TEXT_LEN: usize = 24;

/// Longest list row description
pub const MAX_ROW_DESCRIPTION_LEN: usize = 72;

/// Reply buttons allowed in a button message
pub const MAX_REPLY_BUTTONS: usize = 3;

/// Longest reply button id and title, and the list button label
pub const MAX_BUTTON_TEXT_LEN: usize = 20;

/// Kind of media attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Document,
    Video,
    Audio,
    Sticker,
}

impl MediaKind {
    fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Sticker => "sticker",
        }
    }

    fn content_type(&self) -> ContentType {
        match self {
            MediaKind::Image => ContentType::Image,
            MediaKind::Document => ContentType::Document,
            MediaKind::Video => ContentType::Video,
            MediaKind::Audio => ContentType::Audio,
            MediaKind::Sticker => ContentType::Sticker,
        }
    }
}

/// Template header parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateHeader {
    Text {
        text: String,
    },
    Image {
        link: String,
    },
    Document {
        link: String,
        #[serde(default)]
        filename: Option<String>,
    },
    Video {
        link: String,
    },
}

impl TemplateHeader {
    fn to_component(&self) -> Value {
        let parameter = match self {
            TemplateHeader::Text { text } => json!({"type": "text", "text": text}),
            TemplateHeader::Image { link } => json!({"type": "image", "image": {"link": link}}),
            TemplateHeader::Document { link, filename } => {
                let mut document = json!({"link": link});
                if let Some(filename) = filename {
                    document["filename"] = json!(filename);
                }
                json!({"type": "document", "document": document})
            }
            TemplateHeader::Video { link } => json!({"type": "video", "video": {"link": link}}),
        };
        json!({"type": "header", "parameters": [parameter]})
    }
}

/// One selectable row of a list message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One quick-reply button
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// Interactive message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interactive {
    /// A menu opened by `button`, with up to ten rows
    List {
        #[serde(default)]
        header: Option<String>,
        body: String,
        #[serde(default)]
        footer: Option<String>,
        button: String,
        #[serde(default)]
        section_title: Option<String>,
        rows: Vec<ListRow>,
    },
    /// Up to three quick-reply buttons
    Buttons {
        #[serde(default)]
        header: Option<String>,
        body: String,
        #[serde(default)]
        footer: Option<String>,
        buttons: Vec<ReplyButton>,
    },
}

impl Interactive {
    fn body(&self) -> &str {
        match self {
            Interactive::List { body, .. } | Interactive::Buttons { body, .. } => body,
        }
    }

    fn validate(&self) -> Result<()> {
        let body = self.body();
        if body.trim().is_empty() {
            return Err(Error::Validation("Interactive body must not be empty".to_string()));
        }
        if body.chars().count() > MAX_INTERACTIVE_BODY_LEN {
            return Err(Error::Validation(format!(
                "Interactive body exceeds {} characters",
                MAX_INTERACTIVE_BODY_LEN
            )));
        }

        match self {
            Interactive::List { button, rows, .. } => {
                check_len("list button", button, MAX_BUTTON_TEXT_LEN)?;
                if rows.is_empty() || rows.len() > MAX_LIST_ROWS {
                    return Err(Error::Validation(format!(
                        "A list needs between 1 and {} rows, got {}",
                        MAX_LIST_ROWS,
                        rows.len()
                    )));
                }
                check_unique(rows.iter().map(|r| (r.id.as_str(), r.title.as_str())))?;
                for row in rows {
                    check_len("row id", &row.id, MAX_ROW_TEXT_LEN)?;
                    check_len("row title", &row.title, MAX_ROW_TEXT_LEN)?;
                    if let Some(description) = &row.description {
                        if description.chars().count() > MAX_ROW_DESCRIPTION_LEN {
                            return Err(Error::Validation(format!(
                                "Row description exceeds {} characters (row {})",
                                MAX_ROW_DESCRIPTION_LEN, row.id
                            )));
                        }
                    }
                }
            }
            Interactive::Buttons { buttons, .. } => {
                if buttons.is_empty() || buttons.len() > MAX_REPLY_BUTTONS {
                    return Err(Error::Validation(format!(
                        "A button message needs between 1 and {} buttons, got {}",
                        MAX_REPLY_BUTTONS,
                        buttons.len()
                    )));
                }
                check_unique(buttons.iter().map(|b| (b.id.as_str(), b.title.as_str())))?;
                for button in buttons {
                    check_len("button id", &button.id, MAX_BUTTON_TEXT_LEN)?;
                    check_len("button title", &button.title, MAX_BUTTON_TEXT_LEN)?;
                }
            }
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        let (header, body, footer) = match self {
            Interactive::List {
                header, body, footer, ..
            }
            | Interactive::Buttons {
                header, body, footer, ..
            } => (header, body, footer),
        };

        let mut interactive = match self {
            Interactive::List {
                button,
                section_title,
                rows,
                ..
            } => json!({
                "type": "list",
                "action": {
                    "button": button,
                    "sections": [{
                        "title": section_title.as_deref().unwrap_or(button),
                        "rows": rows,
                    }],
                },
            }),
            Interactive::Buttons { buttons, .. } => {
                let buttons: Vec<Value> = buttons
                    .iter()
                    .map(|b| json!({"type": "reply", "reply": {"id": b.id, "title": b.title}}))
                    .collect();
                json!({"type": "button", "action": {"buttons": buttons}})
            }
        };

        interactive["body"] = json!({"text": body});
        if let Some(header) = header {
            interactive["header"] = json!({"type": "text", "text": header});
        }
        if let Some(footer) = footer {
            interactive["footer"] = json!({"text": footer});
        }
        interactive
    }
}

/// Non-empty and at most `max` characters
fn check_len(what: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("The {} must not be empty", what)));
    }
    if value.chars().count() > max {
        return Err(Error::Validation(format!(
            "The {} must not exceed {} characters ({})",
            what, max, value
        )));
    }
    Ok(())
}

fn check_unique<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> Result<()> {
    let mut ids = std::collections::HashSet::new();
    let mut titles = std::collections::HashSet::new();
    for (id, title) in entries {
        if !ids.insert(id) {
            return Err(Error::Validation(format!("Duplicate id: {}", id)));
        }
        if !titles.insert(title) {
            return Err(Error::Validation(format!("Duplicate title: {}", title)));
        }
    }
    Ok(())
}

/// Content of an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        body: String,
        #[serde(default)]
        preview_url: bool,
    },
    Template {
        name: String,
        language: String,
        #[serde(default)]
        body_params: Vec<String>,
        #[serde(default)]
        header: Option<TemplateHeader>,
    },
    Media {
        kind: MediaKind,
        #[serde(default)]
        link: Option<String>,
        #[serde(default)]
        media_id: Option<String>,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        filename: Option<String>,
    },
    Reaction {
        message_id: String,
        emoji: String,
    },
    Interactive {
        interactive: Interactive,
    },
}

impl OutboundContent {
    /// Stored content type
    pub fn content_type(&self) -> ContentType {
        match self {
            OutboundContent::Text { .. } => ContentType::Text,
            OutboundContent::Template { .. } => ContentType::Template,
            OutboundContent::Media { kind, .. } => kind.content_type(),
            OutboundContent::Reaction { .. } => ContentType::Reaction,
            OutboundContent::Interactive { .. } => ContentType::Interactive,
        }
    }

    /// Text kept on the stored message row
    pub fn summary(&self) -> Option<String> {
        match self {
            OutboundContent::Text { body, .. } => Some(body.clone()),
            OutboundContent::Media { caption, .. } => caption.clone(),
            OutboundContent::Reaction { emoji, .. } => Some(emoji.clone()),
            OutboundContent::Interactive { interactive } => Some(interactive.body().to_string()),
            OutboundContent::Template { .. } => None,
        }
    }

    /// Whether sending requires an open customer-service window
    pub fn is_free_form(&self) -> bool {
        !matches!(self, OutboundContent::Template { .. })
    }

    /// Shape checks that need no stored state
    pub fn validate(&self) -> Result<()> {
        match self {
            OutboundContent::Text { body, .. } => {
                if body.trim().is_empty() {
                    return Err(Error::Validation("Text body must not be empty".to_string()));
                }
                if body.chars().count() > MAX_TEXT_LEN {
                    return Err(Error::Validation(format!(
                        "Text body exceeds {} characters",
                        MAX_TEXT_LEN
                    )));
                }
            }
            OutboundContent::Template { name, language, .. } => {
                if name.trim().is_empty() || language.trim().is_empty() {
                    return Err(Error::Validation(
                        "Template name and language are required".to_string(),
                    ));
                }
            }
            OutboundContent::Media { link, media_id, .. } => {
                if link.is_some() == media_id.is_some() {
                    return Err(Error::Validation(
                        "Media needs exactly one of link or media_id".to_string(),
                    ));
                }
            }
            OutboundContent::Reaction { message_id, .. } => {
                if message_id.trim().is_empty() {
                    return Err(Error::Validation(
                        "Reaction needs the message id it reacts to".to_string(),
                    ));
                }
            }
            OutboundContent::Interactive { interactive } => interactive.validate()?,
        }
        Ok(())
    }
}

/// A message ready to be sent
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub to: PhoneNumber,
    pub content: OutboundContent,
    /// Remote id of the message being replied to
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    /// JSON body of `POST /{phone_number_id}/messages`
    pub fn to_request_body(&self) -> Value {
        let mut body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": self.to.as_str(),
        });

        match &self.content {
            OutboundContent::Text { body: text, preview_url } => {
                body["type"] = json!("text");
                body["text"] = json!({"preview_url": preview_url, "body": text});
            }
            OutboundContent::Template {
                name,
                language,
                body_params,
                header,
            } => {
                let mut components = Vec::new();
                if let Some(header) = header {
                    components.push(header.to_component());
                }
                if !body_params.is_empty() {
                    let parameters: Vec<Value> = body_params
                        .iter()
                        .map(|p| json!({"type": "text", "text": p}))
                        .collect();
                    components.push(json!({"type": "body", "parameters": parameters}));
                }
                body["type"] = json!("template");
                body["template"] = json!({
                    "name": name,
                    "language": {"code": language},
                    "components": components,
                });
            }
            OutboundContent::Media {
                kind,
                link,
                media_id,
                caption,
                filename,
            } => {
                let mut media = json!({});
                if let Some(link) = link {
                    media["link"] = json!(link);
                }
                if let Some(id) = media_id {
                    media["id"] = json!(id);
                }
                if let Some(caption) = caption {
                    if !matches!(kind, MediaKind::Audio | MediaKind::Sticker) {
                        media["caption"] = json!(caption);
                    }
                }
                if let (MediaKind::Document, Some(filename)) = (kind, filename) {
                    media["filename"] = json!(filename);
                }
                body["type"] = json!(kind.as_str());
                body[kind.as_str()] = media;
            }
            OutboundContent::Reaction { message_id, emoji } => {
                body["type"] = json!("reaction");
                body["reaction"] = json!({"message_id": message_id, "emoji": emoji});
            }
            OutboundContent::Interactive { interactive } => {
                body["type"] = json!("interactive");
                body["interactive"] = interactive.to_value();
            }
        }

        if let Some(reply_to) = &self.reply_to {
            body["context"] = json!({"message_id": reply_to});
        }
        body
    }
}

/// Response to a successful send
#[derive(Debug, Clone, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub messages: Vec<SentMessageId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessageId {
    pub id: String,
}

/// Error envelope returned on non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: RemoteError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error_user_title: Option<String>,
    #[serde(default)]
    pub error_user_msg: Option<String>,
}

/// One page of `GET /{business_id}/message_templates`
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatePage {
    #[serde(default)]
    pub data: Vec<RemoteTemplate>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl TemplatePage {
    /// Cursor of the next page, if there is one
    pub fn next_cursor(&self) -> Option<&str> {
        let paging = self.paging.as_ref()?;
        paging.next.as_ref()?;
        paging.cursors.as_ref()?.after.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub cursors: Option<Cursors>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

/// A template as reported by the Cloud API
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTemplate {
    pub id: String,
    pub name: String,
    pub language: String,
    pub status: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub rejected_reason: Option<String>,
    #[serde(default)]
    pub components: Vec<RemoteComponent>,
}

/// One component (HEADER, BODY, FOOTER, BUTTONS) of a remote template
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteComponent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub example: Option<Value>,
    #[serde(default)]
    pub buttons: Option<Value>,
}
