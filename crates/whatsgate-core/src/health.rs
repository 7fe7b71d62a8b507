//! Health Checker - Database, remote connectivity and per-account pressure

use crate::circuit_breaker::BreakerState;
use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;
use crate::rate_limiter::RemainingQuota;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use whatsgate_common::config::HealthConfig;
use whatsgate_common::types::AccountId;
use whatsgate_common::Result;
use whatsgate_storage::Store;

/// Overall or per-component status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of probing one dependency
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result(result: Result<()>, started: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: HealthStatus::Healthy,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => Self {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Health of one enabled account
#[derive(Debug, Clone, Serialize)]
pub struct AccountHealth {
    pub account_id: AccountId,
    pub name: String,
    pub status: HealthStatus,
    /// Connectivity probe, absent when remote probing is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<ComponentHealth>,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
    pub quota: RemainingQuota,
}

/// Full health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub storage_backend: &'static str,
    pub database: ComponentHealth,
    pub accounts: Vec<AccountHealth>,
}

/// Health checker
pub struct HealthChecker {
    store: Store,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    config: HealthConfig,
    last: RwLock<Option<HealthReport>>,
}

impl HealthChecker {
    pub fn new(
        store: Store,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
            config,
            last: RwLock::new(None),
        }
    }

    /// Run all checks now and remember the report
    pub async fn check(&self) -> HealthReport {
        let started = Instant::now();
        let database = ComponentHealth::from_result(self.store.health_check().await, started);

        let mut accounts = Vec::new();
        if database.status == HealthStatus::Healthy {
            match self.store.accounts.list().await {
                Ok(list) => {
                    for account in list.into_iter().filter(|a| a.enabled) {
                        let remote = if self.config.probe_remote {
                            let started = Instant::now();
                            let result = self.dispatcher.client().probe(&account).await;
                            Some(ComponentHealth::from_result(result, started))
                        } else {
                            None
                        };

                        let snapshot = self.dispatcher.circuit_breaker().snapshot(account.id).await;
                        let quota = self.dispatcher.rate_limiter().remaining(account.id).await;

                        let mut status = HealthStatus::Healthy;
                        if snapshot.state != BreakerState::Closed || quota.is_exhausted() {
                            status = HealthStatus::Degraded;
                        }
                        if let Some(remote) = &remote {
                            status = status.max(remote.status);
                        }

                        accounts.push(AccountHealth {
                            account_id: account.id,
                            name: account.name,
                            status,
                            remote,
                            breaker: snapshot.state,
                            consecutive_failures: snapshot.consecutive_failures,
                            quota,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "Could not list accounts for health check"),
            }
        }

        let status = accounts
            .iter()
            .map(|a| a.status)
            .fold(database.status, HealthStatus::max);

        self.metrics
            .observe_breakers(&self.dispatcher.circuit_breaker().snapshots().await);

        let report = HealthReport {
            status,
            checked_at: Utc::now(),
            storage_backend: self.store.backend(),
            database,
            accounts,
        };
        *self.last.write().await = Some(report.clone());
        report
    }

    /// The most recent report, if a check has run
    pub async fn last_report(&self) -> Option<HealthReport> {
        self.last.read().await.clone()
    }

    /// Repeat the check every `interval_secs` until the task is dropped
    pub async fn run(self: Arc<Self>) {
        if self.config.interval_secs == 0 {
            info!("Background health checks disabled");
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        info!("Health checker started (interval: {}s)", self.config.interval_secs);

        loop {
            ticker.tick().await;
            let report = self.check().await;
            match report.status {
                HealthStatus::Healthy => debug!("Health check passed"),
                HealthStatus::Degraded => warn!("Health check degraded"),
                HealthStatus::Unhealthy => error!("Health check failed"),
            }

            let pruned = self.dispatcher.rate_limiter().prune_idle().await;
            if pruned > 0 {
                debug!(pruned, "Pruned idle rate limiter windows");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account_input, dispatcher};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn checker(store: &Store, server: &MockServer, probe_remote: bool) -> HealthChecker {
        HealthChecker::new(
            store.clone(),
            dispatcher(store, &server.uri(), 10),
            Arc::new(Metrics::new().unwrap()),
            HealthConfig {
                interval_secs: 0,
                probe_remote,
            },
        )
    }

    #[tokio::test]
    async fn test_healthy_with_reachable_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v18.0/1055"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1055"})))
            .mount(&server)
            .await;

        let store = Store::memory();
        store.accounts.create(account_input("1055")).await.unwrap();
        let checker = checker(&store, &server, true);

        assert!(checker.last_report().await.is_none());
        let report = checker.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.storage_backend, "memory");
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].breaker, BreakerState::Closed);
        assert_eq!(report.accounts[0].quota.remaining, 10);
        assert!(checker.last_report().await.is_some());
    }

    #[tokio::test]
    async fn test_open_breaker_degrades() {
        let server = MockServer::start().await;
        let store = Store::memory();
        let account = store.accounts.create(account_input("1055")).await.unwrap();
        let checker = checker(&store, &server, false);

        checker
            .dispatcher
            .circuit_breaker()
            .force_open(account.id)
            .await;

        let report = checker.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.accounts[0].breaker, BreakerState::Open);
        assert!(report.accounts[0].remote.is_none());
    }

    #[tokio::test]
    async fn test_failing_probe_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Store::memory();
        store.accounts.create(account_input("1055")).await.unwrap();
        let report = checker(&store, &server, true).check().await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        let remote = report.accounts[0].remote.as_ref().unwrap();
        assert_eq!(remote.status, HealthStatus::Unhealthy);
        assert!(remote.error.is_some());
    }
}
