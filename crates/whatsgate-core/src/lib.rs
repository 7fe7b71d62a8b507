//! WhatsGate Core - Outbound dispatch, webhook ingestion and campaigns
//!
//! This crate provides the messaging pipeline for the WhatsApp Business
//! Cloud API: per-account rate limiting and circuit breaking, the message
//! dispatcher, webhook ingestion, bulk campaigns, template sync and health
//! checks.

pub mod campaign;
pub mod circuit_breaker;
pub mod cloud_api;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod rate_limiter;
pub mod template_sync;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

pub use campaign::{CampaignProgress, CampaignRunner, MessageRenderer};
pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cloud_api::{CloudApiClient, OutboundContent, OutboundMessage};
pub use dispatcher::{Dispatcher, SendFailure, SendReceipt, SendRequest};
pub use health::{HealthChecker, HealthReport, HealthStatus};
pub use metrics::Metrics;
pub use rate_limiter::{RateLimiter, RemainingQuota};
pub use template_sync::{SyncReport, TemplateSync};
pub use webhook::{Effect, WebhookAck, WebhookIngestor};
