//! Prometheus metrics for the dispatch pipeline
//!
//! Provides send, webhook and campaign counters plus a breaker gauge, all
//! registered on one registry rendered by the `/metrics` endpoint.

use crate::circuit_breaker::{BreakerSnapshot, BreakerState};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use whatsgate_common::{Error, Result};

/// Metrics registry
pub struct Metrics {
    registry: Registry,
    /// Outbound sends by outcome
    pub messages_sent: IntCounterVec,
    /// Webhook events by kind
    pub webhook_events: IntCounterVec,
    /// Webhook deliveries rejected (bad signature or malformed)
    pub webhook_rejected: IntCounterVec,
    /// Campaign recipients processed by outcome
    pub campaign_recipients: IntCounterVec,
    /// Read receipts sent
    pub read_receipts: IntCounter,
    /// Breakers currently not closed
    pub open_breakers: IntGauge,
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("whatsgate".to_string()), None)
            .map_err(metrics_error)?;

        let messages_sent = IntCounterVec::new(
            Opts::new("messages_sent_total", "Outbound message sends by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let webhook_events = IntCounterVec::new(
            Opts::new("webhook_events_total", "Webhook events processed by kind"),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let webhook_rejected = IntCounterVec::new(
            Opts::new("webhook_rejected_total", "Webhook deliveries rejected by reason"),
            &["reason"],
        )
        .map_err(metrics_error)?;
        let campaign_recipients = IntCounterVec::new(
            Opts::new("campaign_recipients_total", "Campaign recipients processed by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let read_receipts =
            IntCounter::new("read_receipts_total", "Read receipts sent").map_err(metrics_error)?;
        let open_breakers = IntGauge::new(
            "open_circuit_breakers",
            "Accounts whose circuit breaker is open or half-open",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(messages_sent.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(webhook_events.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(webhook_rejected.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(campaign_recipients.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(read_receipts.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(open_breakers.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            messages_sent,
            webhook_events,
            webhook_rejected,
            campaign_recipients,
            read_receipts,
            open_breakers,
        })
    }

    /// Count one send outcome; `None` is a successful send
    pub fn record_send(&self, error: Option<&Error>) {
        let outcome = match error {
            None => "sent",
            Some(Error::RateLimitExceeded { .. }) => "rate_limited",
            Some(Error::CircuitOpen { .. }) => "circuit_open",
            Some(Error::RemoteApi { .. }) => "failed",
            Some(Error::Validation(_)) => "invalid",
            Some(_) => "error",
        };
        self.messages_sent.with_label_values(&[outcome]).inc();
    }

    /// Refresh the breaker gauge from current snapshots
    pub fn observe_breakers(&self, snapshots: &[BreakerSnapshot]) {
        let open = snapshots
            .iter()
            .filter(|s| s.state != BreakerState::Closed)
            .count();
        self.open_breakers.set(open as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
