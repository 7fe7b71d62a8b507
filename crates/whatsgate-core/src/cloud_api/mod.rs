//! Meta WhatsApp Cloud API integration
//!
//! The HTTP seam used for sending messages, read receipts, template
//! listing and connectivity probes.

pub mod client;
pub mod payload;

pub use client::CloudApiClient;
pub use payload::{
    Interactive, ListRow, MediaKind, OutboundContent, OutboundMessage, RemoteTemplate,
    ReplyButton, TemplateHeader, TemplatePage, MAX_TEXT_LEN,
};
