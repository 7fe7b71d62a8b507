//! Common types for WhatsGate

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for accounts
pub type AccountId = Uuid;

/// Unique identifier for messages
pub type MessageId = Uuid;

/// Unique identifier for templates
pub type TemplateId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for recipient lists
pub type RecipientListId = Uuid;

/// Unique identifier for recipients
pub type RecipientId = Uuid;

/// Implements `Display` and `FromStr` over the snake_case wire names.
macro_rules! string_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Wire/storage representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(crate::Error::Validation(format!("Invalid {}: {}", $what, s))),
                }
            }
        }
    };
}

/// Direction of a message relative to the business
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

string_enum!(Direction, "direction", {
    Inbound => "inbound",
    Outbound => "outbound",
});

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
    /// Inbound messages stored from the webhook
    Received,
}

string_enum!(MessageStatus, "message status", {
    Queued => "queued",
    Sent => "sent",
    Delivered => "delivered",
    Read => "read",
    Failed => "failed",
    Received => "received",
});

impl MessageStatus {
    /// Position in the forward-only delivery ordering
    fn rank(&self) -> Option<u8> {
        match self {
            MessageStatus::Queued => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed | MessageStatus::Received => None,
        }
    }

    /// Whether no further status update may change this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Failed | MessageStatus::Received)
    }

    /// Next status after applying `incoming`, or `None` if the update is
    /// stale, a duplicate, or targets a terminal status.
    ///
    /// Statuses only move forward in queued < sent < delivered < read.
    /// `failed` is reachable from every non-terminal status.
    pub fn advance(self, incoming: MessageStatus) -> Option<MessageStatus> {
        if self.is_terminal() {
            return None;
        }
        match incoming {
            MessageStatus::Failed => Some(MessageStatus::Failed),
            MessageStatus::Received => None,
            _ => match (self.rank(), incoming.rank()) {
                (Some(current), Some(next)) if next > current => Some(incoming),
                _ => None,
            },
        }
    }
}

/// Kind of message content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Template,
    Image,
    Document,
    Video,
    Audio,
    Sticker,
    Reaction,
    Interactive,
    Button,
    Location,
    Unsupported,
}

string_enum!(ContentType, "content type", {
    Text => "text",
    Template => "template",
    Image => "image",
    Document => "document",
    Video => "video",
    Audio => "audio",
    Sticker => "sticker",
    Reaction => "reaction",
    Interactive => "interactive",
    Button => "button",
    Location => "location",
    Unsupported => "unsupported",
});

/// Approval status of a message template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Pending,
    Approved,
    Rejected,
    Paused,
    Disabled,
}

string_enum!(TemplateStatus, "template status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Paused => "paused",
    Disabled => "disabled",
});

impl TemplateStatus {
    /// Map the Cloud API status/event strings (`APPROVED`, `IN_APPEAL`, ...)
    pub fn from_remote(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "APPROVED" => Some(TemplateStatus::Approved),
            "REJECTED" => Some(TemplateStatus::Rejected),
            "PENDING" | "IN_APPEAL" | "PENDING_DELETION" | "REINSTATED" => {
                Some(TemplateStatus::Pending)
            }
            "PAUSED" | "FLAGGED" => Some(TemplateStatus::Paused),
            "DISABLED" | "DELETED" => Some(TemplateStatus::Disabled),
            _ => None,
        }
    }
}

/// Template header type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderType {
    None,
    Text,
    Image,
    Document,
    Video,
}

string_enum!(HeaderType, "header type", {
    None => "none",
    Text => "text",
    Image => "image",
    Document => "document",
    Video => "video",
});

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Queued,
    InProgress,
    Completed,
    PartiallyFailed,
    Stopped,
}

string_enum!(CampaignStatus, "campaign status", {
    Draft => "draft",
    Queued => "queued",
    InProgress => "in_progress",
    Completed => "completed",
    PartiallyFailed => "partially_failed",
    Stopped => "stopped",
});

/// Delivery state of one campaign recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    Queued,
    Sent,
    Failed,
}

string_enum!(RecipientState, "recipient state", {
    Queued => "queued",
    Sent => "sent",
    Failed => "failed",
});

/// How template variables are bound for campaign recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableMode {
    /// The same variables for every recipient
    Common,
    /// Variables taken from each recipient's data
    Unique,
}

string_enum!(VariableMode, "variable mode", {
    Common => "common",
    Unique => "unique",
});

/// What became of one webhook delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// Signature valid but the body could not be parsed
    Malformed,
    /// Signature missing or wrong
    Rejected,
}

string_enum!(WebhookOutcome, "webhook outcome", {
    Processed => "processed",
    Malformed => "malformed",
    Rejected => "rejected",
});

/// A normalised WhatsApp phone number (digits only, country code first)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a phone number, dropping separators and a leading `+`
    pub fn parse(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
        let digits: String = without_plus
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
            .collect();

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::Error::Validation(format!(
                "Invalid phone number: {}",
                s
            )));
        }
        if !(7..=15).contains(&digits.len()) {
            return Err(crate::Error::Validation(format!(
                "Phone number must have 7 to 15 digits: {}",
                s
            )));
        }
        Ok(Self(digits))
    }

    /// Digits as sent to the Cloud API
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PhoneNumber> for String {
    fn from(p: PhoneNumber) -> Self {
        p.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phone_number_parse() {
        assert_eq!(PhoneNumber::parse("+57 300-123 4567").unwrap().as_str(), "573001234567");
        assert_eq!(PhoneNumber::parse("(91) 98765.43210").unwrap().as_str(), "919876543210");
        assert!(PhoneNumber::parse("12345").is_err());
        assert!(PhoneNumber::parse("+1 800 FLOWERS").is_err());
        assert!(PhoneNumber::parse("").is_err());
        assert!(PhoneNumber::parse("1234567890123456").is_err());
    }

    #[test]
    fn test_status_advances_forward_only() {
        use MessageStatus::*;
        assert_eq!(Sent.advance(Delivered), Some(Delivered));
        assert_eq!(Sent.advance(Read), Some(Read));
        assert_eq!(Read.advance(Delivered), None);
        assert_eq!(Delivered.advance(Delivered), None);
        assert_eq!(Queued.advance(Sent), Some(Sent));
    }

    #[test]
    fn test_failed_is_terminal() {
        use MessageStatus::*;
        assert_eq!(Read.advance(Failed), Some(Failed));
        assert_eq!(Queued.advance(Failed), Some(Failed));
        assert_eq!(Failed.advance(Read), None);
        assert_eq!(Failed.advance(Failed), None);
        assert_eq!(Received.advance(Read), None);
    }

    #[test]
    fn test_string_enums_round_trip_names() {
        assert_eq!(CampaignStatus::PartiallyFailed.to_string(), "partially_failed");
        assert_eq!(
            "in_progress".parse::<CampaignStatus>().unwrap(),
            CampaignStatus::InProgress
        );
        assert_eq!("IMAGE".parse::<HeaderType>().unwrap(), HeaderType::Image);
        assert!("bogus".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_template_status_from_remote() {
        assert_eq!(TemplateStatus::from_remote("APPROVED"), Some(TemplateStatus::Approved));
        assert_eq!(TemplateStatus::from_remote("IN_APPEAL"), Some(TemplateStatus::Pending));
        assert_eq!(TemplateStatus::from_remote("FLAGGED"), Some(TemplateStatus::Paused));
        assert_eq!(TemplateStatus::from_remote("SOMETHING_NEW"), None);
    }
}
