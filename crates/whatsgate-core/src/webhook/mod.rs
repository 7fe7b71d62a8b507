//! Webhook ingestion
//!
//! Parsing of Cloud API deliveries, signature checks, and the ingestor
//! that turns events into stored state and follow-up effects.

pub mod events;
pub mod ingestor;
pub mod signature;

pub use events::{InboundMessage, StatusUpdate, TemplateStatusUpdate, WebhookEvent};
pub use ingestor::{Effect, WebhookAck, WebhookIngestor};
pub use signature::secrets_equal;
